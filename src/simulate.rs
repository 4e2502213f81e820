//! Headless driver: scrolls a synthetic paged list and pushes a batch of
//! sync jobs through a queue, printing `key=value` lines per phase.

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use pvlist::jobs::JobQueueBuilder;
use pvlist::{
    BoxFuture, ItemSize, JobOutput, JobPayload, JobQueue, JobSpec, MergePolicy, PagedWindowList,
    SourceConfig, WindowConfig,
};

pub const USAGE: &str = "usage: pvlist --simulate [--total N] [--page-size N] [--row-height PX] \
[--viewport PX] [--steps N] [--latency-ms MS] [--jobs N]";

#[derive(Debug, Clone)]
pub struct SimulateArgs {
    pub total: usize,
    pub page_size: usize,
    pub row_height: f64,
    pub viewport: f64,
    pub steps: usize,
    pub latency_ms: u64,
    pub jobs: usize,
}

pub fn maybe_parse_args() -> Result<Option<SimulateArgs>> {
    let mut simulate = false;
    let mut total: usize = 10_000;
    let mut page_size: usize = pvlist::config::DEFAULT_PAGE_SIZE;
    let mut row_height: f64 = pvlist::config::DEFAULT_BASE_HEIGHT;
    let mut viewport: f64 = 600.0;
    let mut steps: usize = 20;
    let mut latency_ms: u64 = 5;
    let mut jobs: usize = 8;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--simulate" => simulate = true,
            "--total" => {
                let value = args.next().context("Missing value for --total")?;
                total = value
                    .parse::<usize>()
                    .context("Failed to parse --total as a non-negative integer")?;
            }
            "--page-size" => {
                let value = args.next().context("Missing value for --page-size")?;
                page_size = value
                    .parse::<usize>()
                    .context("Failed to parse --page-size as a positive integer")?;
            }
            "--row-height" => {
                let value = args.next().context("Missing value for --row-height")?;
                row_height = value
                    .parse::<f64>()
                    .context("Failed to parse --row-height as a number")?;
            }
            "--viewport" => {
                let value = args.next().context("Missing value for --viewport")?;
                viewport = value
                    .parse::<f64>()
                    .context("Failed to parse --viewport as a number")?;
            }
            "--steps" => {
                let value = args.next().context("Missing value for --steps")?;
                steps = value
                    .parse::<usize>()
                    .context("Failed to parse --steps as a positive integer")?;
            }
            "--latency-ms" => {
                let value = args.next().context("Missing value for --latency-ms")?;
                latency_ms = value
                    .parse::<u64>()
                    .context("Failed to parse --latency-ms as a non-negative integer")?;
            }
            "--jobs" => {
                let value = args.next().context("Missing value for --jobs")?;
                jobs = value
                    .parse::<usize>()
                    .context("Failed to parse --jobs as a non-negative integer")?;
            }
            other => bail!("Unknown argument: {other}"),
        }
    }

    if !simulate {
        return Ok(None);
    }
    if page_size == 0 {
        bail!("--page-size must be greater than 0");
    }
    if steps == 0 {
        bail!("--steps must be greater than 0");
    }
    if !(row_height > 0.0) {
        bail!("--row-height must be greater than 0");
    }
    if !(viewport > 0.0) {
        bail!("--viewport must be greater than 0");
    }

    Ok(Some(SimulateArgs {
        total,
        page_size,
        row_height,
        viewport,
        steps,
        latency_ms,
        jobs,
    }))
}

/// Sync work the simulation schedules against the list.
#[derive(Debug, Clone)]
enum SyncJob {
    /// Re-fetch these pages.
    Refresh(Vec<usize>),
    /// Re-read the backing row count and resize the list to it.
    Recount,
}

impl JobPayload for SyncJob {
    type Output = usize;

    fn kind(&self) -> &'static str {
        match self {
            SyncJob::Refresh(_) => "refresh",
            SyncJob::Recount => "recount",
        }
    }

    fn merge(&mut self, newer: Self) {
        match (self, newer) {
            (SyncJob::Refresh(pages), SyncJob::Refresh(more)) => {
                pages.extend(more);
                pages.sort_unstable();
                pages.dedup();
            }
            (this, newer) => *this = newer,
        }
    }
}

/// Shared state handed to every sync job.
struct SimContext {
    list: PagedWindowList<String>,
    /// Rows the synthetic backend currently holds; may run ahead of the list.
    rows: Arc<AtomicUsize>,
    page_size: usize,
    /// Recount attempts that fail before one succeeds.
    recount_failures: AtomicUsize,
}

async fn execute(job: SyncJob, ctx: Arc<SimContext>) -> Result<JobOutput<SyncJob, SimContext>> {
    match job {
        SyncJob::Refresh(pages) => {
            let source = ctx.list.source();
            let mut fetched = 0;
            for page in pages {
                let first = page * ctx.page_size;
                fetched += source.ensure_pages(first, first).await?;
            }
            Ok(JobOutput::with_data(fetched))
        }
        SyncJob::Recount => {
            if ctx.recount_failures.load(Ordering::SeqCst) > 0 {
                ctx.recount_failures.fetch_sub(1, Ordering::SeqCst);
                bail!("backend busy");
            }
            let total = ctx.rows.load(Ordering::SeqCst);
            ctx.list.set_total_count(total);
            Ok(JobOutput::with_data(total))
        }
    }
}

pub fn run_simulation(args: SimulateArgs) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime for simulation")?;
    runtime.block_on(simulate(args))
}

/// Backend serving `row-N` strings for `0..rows`, after `latency`.
fn synthetic_fetcher(
    rows: Arc<AtomicUsize>,
    fetches: Arc<AtomicUsize>,
    latency: Duration,
) -> impl Fn(usize, usize) -> BoxFuture<Result<Vec<String>>> + Send + Sync {
    move |skip, take| {
        fetches.fetch_add(1, Ordering::Relaxed);
        let end = (skip + take).min(rows.load(Ordering::SeqCst));
        let fut: BoxFuture<Result<Vec<String>>> = Box::pin(async move {
            tokio::time::sleep(latency).await;
            Ok((skip.min(end)..end).map(|i| format!("row-{i}")).collect())
        });
        fut
    }
}

async fn simulate(args: SimulateArgs) -> Result<()> {
    let fetches = Arc::new(AtomicUsize::new(0));
    let rows = Arc::new(AtomicUsize::new(args.total));
    let fetcher = synthetic_fetcher(
        Arc::clone(&rows),
        Arc::clone(&fetches),
        Duration::from_millis(args.latency_ms),
    );

    let list = PagedWindowList::new(
        fetcher,
        args.total,
        SourceConfig::default().with_page_size(args.page_size),
        WindowConfig {
            base_height: args.row_height,
            ..WindowConfig::default()
        },
    );
    let events = list.subscribe();

    println!(
        "phase=scroll start total={} page_size={} steps={}",
        args.total, args.page_size, args.steps
    );
    let start = Instant::now();
    let max_scroll = (list.with_window(|w| w.total_height()) - args.viewport).max(0.0);
    let denominator = args.steps.saturating_sub(1).max(1) as f64;

    for step in 0..args.steps {
        let scroll_top = max_scroll * step as f64 / denominator;
        let render = list
            .scroll(scroll_top, args.viewport)
            .await
            .with_context(|| format!("Scroll step {step} failed"))?;

        // Every other step pretends the first mounted row grew.
        if step % 2 == 1 && !render.items.is_empty() {
            list.on_size_changed(render.first_index, ItemSize::Measured(args.row_height * 2.0));
        }

        println!(
            "step={} scroll_top={:.0} first={} last={} loaded={}/{} pre={:.0} post={:.0}",
            step,
            scroll_top,
            render.first_index,
            render.last_index,
            render.loaded_count(),
            render.items.len(),
            render.pre_spacer_height,
            render.post_spacer_height
        );
    }
    println!(
        "phase=scroll done elapsed_ms={} fetches={} cached_pages={} events={}",
        start.elapsed().as_millis(),
        fetches.load(Ordering::Relaxed),
        list.source().cached_page_count(),
        events.drain().count()
    );

    // New rows land in the backend while the list still shows the old count.
    let arrived = args.page_size / 2 + 1;
    rows.fetch_add(arrived, Ordering::SeqCst);

    let ctx = Arc::new(SimContext {
        list,
        rows,
        page_size: args.page_size,
        recount_failures: AtomicUsize::new(1),
    });
    let queue: JobQueue<SyncJob, SimContext> = JobQueueBuilder::new()
        .default_retries(1)
        .build(Arc::clone(&ctx));

    println!("phase=jobs start requested={} arrived={}", args.jobs, arrived);
    let start = Instant::now();
    let total_pages = ctx.list.source().total_pages().max(1);
    let mut ids = Vec::with_capacity(args.jobs + 1);
    for i in 0..args.jobs {
        let spec = JobSpec::new(SyncJob::Refresh(vec![i % total_pages]), execute)
            .with_tag("refresh")
            .with_merge(MergePolicy::First);
        ids.push(queue.add_job(spec, false)?);
    }
    ids.push(queue.add_job(JobSpec::new(SyncJob::Recount, execute), false)?);
    queue.wait_idle().await;

    ids.sort_unstable();
    ids.dedup();
    for id in &ids {
        if let Some(record) = queue.record(*id) {
            println!(
                "job={} kind={} status={:?} attempts={}",
                id, record.kind, record.status, record.attempts
            );
        }
    }
    println!(
        "phase=jobs done elapsed_ms={} distinct_jobs={} fetches={} total={}",
        start.elapsed().as_millis(),
        ids.len(),
        fetches.load(Ordering::Relaxed),
        ctx.list.total_count()
    );

    queue.dispose();
    ctx.list.dispose();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(shown: usize, rows: usize, recount_failures: usize) -> Arc<SimContext> {
        let rows = Arc::new(AtomicUsize::new(rows));
        let fetcher = synthetic_fetcher(
            Arc::clone(&rows),
            Arc::new(AtomicUsize::new(0)),
            Duration::ZERO,
        );
        Arc::new(SimContext {
            list: PagedWindowList::new(
                fetcher,
                shown,
                SourceConfig::default().with_page_size(10),
                WindowConfig::default(),
            ),
            rows,
            page_size: 10,
            recount_failures: AtomicUsize::new(recount_failures),
        })
    }

    #[tokio::test]
    async fn test_recount_picks_up_new_rows() {
        let ctx = context(10, 15, 0);

        let output = execute(SyncJob::Recount, Arc::clone(&ctx)).await.unwrap();

        assert_eq!(output.data, Some(15));
        assert_eq!(ctx.list.total_count(), 15);
        assert_eq!(ctx.list.source().total_pages(), 2);
    }

    #[tokio::test]
    async fn test_recount_retries_through_queue() {
        let ctx = context(10, 25, 1);
        let queue: JobQueue<SyncJob, SimContext> = JobQueueBuilder::new()
            .default_retries(1)
            .build(Arc::clone(&ctx));

        let id = queue
            .add_job(JobSpec::new(SyncJob::Recount, execute), false)
            .unwrap();
        queue.wait_idle().await;

        assert_eq!(queue.attempts(id), Some(1));
        assert_eq!(ctx.list.total_count(), 25);
    }

    #[tokio::test]
    async fn test_refresh_merges_pages() {
        let mut job = SyncJob::Refresh(vec![3, 1]);
        job.merge(SyncJob::Refresh(vec![1, 2]));
        let SyncJob::Refresh(pages) = job.clone() else {
            panic!("merge changed the job kind");
        };
        assert_eq!(pages, vec![1, 2, 3]);

        let ctx = context(100, 100, 0);
        let output = execute(job, Arc::clone(&ctx)).await.unwrap();
        assert!(output.data.is_some_and(|fetched| fetched >= 3));
        assert!((1..=3).all(|page| ctx.list.source().is_cached(page)));
        assert_eq!(ctx.list.source().get(25), Some("row-25".to_string()));
    }
}
