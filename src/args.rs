use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "supplier-scout")]
#[command(about = "Crawls marketplace search results into structured supplier records")]
#[command(version)]
pub struct Args {
    /// Keyword to search suppliers for
    pub keyword: String,

    /// Maximum number of result pages to crawl (default: until exhausted)
    #[arg(short, long)]
    pub pages: Option<u32>,

    /// WebDriver server URL (WEBDRIVER_URL env var also works)
    #[arg(long)]
    pub webdriver_url: Option<String>,

    /// Path to a JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run the browser with a visible window (needed for manual
    /// challenge intervention)
    #[arg(long)]
    pub headed: bool,

    /// Write extracted records to this file as JSON lines
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
