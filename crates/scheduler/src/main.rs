use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde_json::json;

use taskhive_scheduler::{OwnerId, Priority, ProcessorError, Scheduler, SchedulerConfig};

fn main() -> anyhow::Result<()> {
    taskhive_observability::init();

    let config = SchedulerConfig::from_env().context("loading TASKHIVE_* configuration")?;
    let workers = match std::env::var("TASKHIVE_WORKERS") {
        Ok(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("TASKHIVE_WORKERS={raw:?} is not a number"))?,
        Err(_) => 2,
    };

    let scheduler = Scheduler::new(config);

    scheduler.register_processor("echo", |payload| Ok(payload.clone()))?;
    scheduler.register_processor("word_count", |payload| {
        let text = payload
            .get("text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| ProcessorError::permanent("payload.text must be a string"))?;
        Ok(json!({ "words": text.split_whitespace().count() }))
    })?;

    scheduler.start(workers)?;

    let tenants = [(OwnerId::new(), "free"), (OwnerId::new(), "pro"), (OwnerId::new(), "max")];
    let mut submitted = Vec::new();
    for (owner, tier) in tenants {
        let priorities = [Priority::Low, Priority::Normal, Priority::Urgent];
        for (i, priority) in priorities.into_iter().enumerate() {
            let id = scheduler.enqueue(
                owner,
                "word_count",
                json!({ "text": format!("document {i} for the {tier} tier") }),
                priority,
                tier,
            )?;
            submitted.push(id);
        }
        let echo = scheduler.enqueue(owner, "echo", json!({ "tier": tier }), Priority::High, tier)?;
        submitted.push(echo);
    }
    tracing::info!(jobs = submitted.len(), "sample jobs submitted");

    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let stats = scheduler.stats();
        let open = stats.jobs.pending + stats.jobs.processing + stats.jobs.retrying;
        if open == 0 || Instant::now() >= deadline {
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }

    scheduler.stop();

    let stats = scheduler.stats();
    tracing::info!(stats = %serde_json::to_string(&stats)?, "scheduler drained");
    Ok(())
}
