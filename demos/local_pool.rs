use smithy_pool::prelude::*;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::signal;

#[derive(Debug, Clone)]
struct Invoice {
    id: u64,
    amount_cents: u64,
    rendered: Option<String>,
}

impl Task for Invoice {
    fn task_id(&self) -> TaskId {
        format!("invoice-{}", self.id)
    }
}

/// Renders invoices held in memory, refilling the queue every few seconds.
struct InvoiceRenderer {
    pending: parking_lot::Mutex<VecDeque<Invoice>>,
    next_id: AtomicU64,
}

impl InvoiceRenderer {
    fn new() -> Self {
        Self {
            pending: parking_lot::Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn enqueue(&self, count: u64) {
        let mut pending = self.pending.lock();
        for _ in 0..count {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            pending.push_back(Invoice {
                id,
                amount_cents: id * 1250,
                rendered: None,
            });
        }
    }
}

#[async_trait]
impl Processor<Invoice> for InvoiceRenderer {
    async fn checkout(&self, _token: &CancellationToken, _worker_id: &str) -> PoolResult<Invoice> {
        self.pending
            .lock()
            .pop_front()
            .ok_or(PoolError::NoWorkAvailable)
    }

    async fn process(&self, _token: &CancellationToken, invoice: &Invoice) -> PoolResult<Invoice> {
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Every seventh invoice is broken
        if invoice.id % 7 == 0 {
            return Err(PoolError::processor(format!(
                "invoice {} has no billing address",
                invoice.id
            )));
        }

        Ok(Invoice {
            rendered: Some(format!(
                "Invoice #{}: {}.{:02} EUR",
                invoice.id,
                invoice.amount_cents / 100,
                invoice.amount_cents % 100
            )),
            ..invoice.clone()
        })
    }

    async fn complete(
        &self,
        _token: &CancellationToken,
        invoice: &Invoice,
        duration: Duration,
    ) -> PoolResult<()> {
        tracing::info!(
            invoice = %invoice.rendered.as_deref().unwrap_or_default(),
            duration_ms = duration.as_millis() as u64,
            "Invoice rendered"
        );
        Ok(())
    }

    async fn fail(
        &self,
        _token: &CancellationToken,
        invoice: &Invoice,
        error: &PoolError,
    ) -> PoolResult<()> {
        tracing::warn!(invoice = invoice.id, error = %error, "Invoice rejected");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> PoolResult<()> {
    let config = PoolConfig::development()
        .with_workers(3)
        .with_retry_base_delay(200)
        .with_metrics(MetricsConfig {
            backend: MetricsBackend::Logging,
            report_interval_secs: Some(5),
            report_every_tasks: Some(25),
            report_on_stop: true,
        });
    if let Err(problems) = config.validate() {
        return Err(PoolError::config(problems.join("; ")));
    }
    config.logging.init()?;

    let renderer = Arc::new(InvoiceRenderer::new());
    renderer.enqueue(20);

    let pool = Arc::new(
        Pool::<Invoice>::builder(config.name.clone(), renderer.clone())
            .workers(config.num_workers)
            .poll_interval(config.poll_interval())
            .idle_interval(config.idle_interval())
            .max_retries(config.max_retries)
            .retry_base_delay(config.retry_base_delay())
            .middleware(Arc::new(ConsecutiveErrorShutdown::new(5)))
            .metrics(config.metrics.build(&config.name))
            .build(),
    );

    let producer = {
        let renderer = Arc::clone(&renderer);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3));
            loop {
                ticker.tick().await;
                renderer.enqueue(10);
            }
        })
    };

    let stopper = Arc::clone(&pool);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl+c");
        }
        stopper.stop();
    });

    println!("🔨 Pool is running! Press Ctrl+C to stop...");
    pool.start(&CancellationToken::new()).await?;
    producer.abort();

    let snapshot = pool.metrics();
    println!(
        "🔨 Pool stopped: {} completed, {} failed, {:.1}% errors",
        snapshot.tasks_completed, snapshot.tasks_failed, snapshot.error_rate
    );
    Ok(())
}
