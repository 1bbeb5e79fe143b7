use clap::Parser;
use std::io::Write;
use supplier_scout::{Search, ScoutConfig, SearchEvent, SearchOutcome};

mod args;
use args::Args;

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::init();

    // Parse command-line arguments
    let args = Args::parse();

    ::log::info!("Starting supplier search for keyword: {}", args.keyword);

    let mut config = match &args.config {
        Some(path) => match ScoutConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path.display(), e);
                std::process::exit(2);
            }
        },
        None => ScoutConfig::default(),
    };
    if let Some(url) = &args.webdriver_url {
        config.pool.webdriver_url = url.clone();
    }
    if args.headed {
        config.pool.headless = false;
    }

    println!("Note: crawling requires a WebDriver server (e.g. ChromeDriver).");
    println!(
        "Set WEBDRIVER_URL or --webdriver-url if not using the default {}",
        config.pool.webdriver_url
    );

    let mut search = Search::new(&args.keyword).with_config(config);
    if let Some(pages) = args.pages {
        search = search.with_page_cap(pages);
    }

    let mut handle = match search.stream().await {
        Ok(handle) => handle,
        Err(e) => {
            ::log::error!("Failed to start search: {}", e);
            std::process::exit(1);
        }
    };

    let mut output = args.output.as_ref().map(|path| {
        std::fs::File::create(path).unwrap_or_else(|e| {
            eprintln!("Cannot create {}: {}", path.display(), e);
            std::process::exit(2);
        })
    });

    let start_time = std::time::Instant::now();
    let mut exit_code = 0;

    // Process batches as they come in
    while let Some(event) = handle.next().await {
        match event {
            SearchEvent::PageStarted { page } => {
                ::log::info!("Crawling page {}", page);
            }
            SearchEvent::Batch(batch) => {
                println!(
                    "Page {}: {} suppliers ({} total)",
                    batch.page_number,
                    batch.records.len(),
                    batch.total_so_far
                );
                for record in &batch.records {
                    println!("  {}. {} [{}]", record.index, record.name, record.location.country);
                    if let Some(file) = output.as_mut() {
                        match serde_json::to_string(record) {
                            Ok(line) => {
                                if let Err(e) = writeln!(file, "{}", line) {
                                    ::log::error!("Failed to write record: {}", e);
                                }
                            }
                            Err(e) => ::log::error!("Failed to serialize record: {}", e),
                        }
                    }
                }
            }
            SearchEvent::PageSkipped { page, reason } => {
                println!("Page {} skipped: {}", page, reason);
            }
            SearchEvent::Finished(summary) => {
                let duration = start_time.elapsed();
                println!(
                    "Search {:?} finished: {} records over {} pages in {:.2}s",
                    summary.keyword,
                    summary.total_records,
                    summary.pages_crawled,
                    duration.as_secs_f64()
                );
                match summary.outcome {
                    SearchOutcome::Completed => {}
                    SearchOutcome::Cancelled => {
                        println!("Search was cancelled");
                        exit_code = 1;
                    }
                    SearchOutcome::Failed { reason } => {
                        eprintln!("Search failed: {}", reason);
                        exit_code = 1;
                    }
                }
            }
        }
    }

    std::process::exit(exit_code);
}
