use clap::{CommandFactory, Parser};
use colored::*;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use vigil_core::utils::CandidateList;
use vigil_core::{ConsoleSink, HttpClient, ResultAggregator, ScanConfig, ScanEngine, ScanEventSink, KNOWN_PLUGINS};

#[derive(Parser, Debug)]
#[command(
    name = "VIGIL",
    version,
    about = "Concurrent probe-and-classify web vulnerability scanner",
    override_usage = "vigil <target>  <options>",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  Default plugins:                vigil http://target.com
  Directory bruteforce:           vigil http://target.com -w dirs.txt
  Only LDAP injection:            vigil \"http://target.com/search?q=a\" -p ldapi
  With evasion:                   vigil http://target.com -w dirs.txt -p dir_bruter,mod_security
  With proxy (Burp):              vigil http://target.com --proxy http://127.0.0.1:8080
  Custom headers:                 vigil http://target.com -H \"Cookie: sess=abc\"
  Resumable session:              vigil http://target.com -w dirs.txt --snapshot s.json --resume
  Scan from file:                 vigil -l targets.txt
  From a config file:             vigil -c vigil.json
  Dry-run test:                   vigil http://target.com --dry-run"
)]
pub struct Args {
    pub target: Option<String>,

    #[arg(short = 'c', long, help = "JSON configuration file; flags override it")]
    pub config: Option<PathBuf>,

    #[arg(short = 'l', long = "list", help = "File containing target URLs (one per line)")]
    pub list: Option<String>,

    #[arg(short = 'p', long, value_delimiter = ',', help = "Plugins to enable (comma separated)")]
    pub plugins: Vec<String>,

    #[arg(short = 'w', long, help = "Directory wordlist for dir_bruter")]
    pub wordlist: Option<String>,

    #[arg(long, help = "File of LDAP error signatures, replaces the built-in set")]
    pub signatures: Option<String>,

    #[arg(short = 't', long, help = "Number of concurrent workers")]
    pub workers: Option<usize>,

    #[arg(long, help = "Probes scheduled per batch")]
    pub chunk_size: Option<usize>,

    #[arg(long, help = "Request timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Do not bruteforce discovered directories")]
    pub no_recursive: bool,

    #[arg(long, value_delimiter = ',', help = "Status codes that always mean not found (default 404)")]
    pub not_found_codes: Vec<u16>,

    #[arg(long, help = "Body similarity above which a response matches the not-found page")]
    pub similarity: Option<f64>,

    #[arg(long, help = "Stop queueing targets after this many (0 = unbounded)")]
    pub max_targets: Option<usize>,

    #[arg(short = 'o', long, help = "Append findings as JSON lines to this file")]
    pub output: Option<String>,

    #[arg(long, help = "Save the session here when the scan ends")]
    pub snapshot: Option<String>,

    #[arg(long, help = "Continue from the snapshot file if it exists")]
    pub resume: bool,

    #[arg(long, help = "Proxy URL (e.g. http://127.0.0.1:8080)")]
    pub proxy: Option<String>,

    #[arg(short = 'H', long = "header", help = "Custom header (e.g. \"Authorization: Bearer TOKEN\")")]
    pub headers: Vec<String>,

    #[arg(short = 'v', long, default_value_t = false, help = "Debug logging")]
    pub verbose: bool,

    #[arg(long, help = "Show the plan without sending requests")]
    pub dry_run: bool,
}

impl Args {
    /// Layers the flags that were given over `config`.
    fn apply(&self, config: &mut ScanConfig) {
        if let Some(ref t) = self.target {
            config.target = t.clone();
        }
        if let Some(ref l) = self.list {
            config.list_file = l.clone();
        }
        if !self.plugins.is_empty() {
            config.plugins = self.plugins.clone();
        }
        if let Some(ref w) = self.wordlist {
            config.wordlist = w.clone();
        }
        if let Some(ref s) = self.signatures {
            config.signatures = s.clone();
        }
        if let Some(w) = self.workers {
            config.workers = w;
        }
        if let Some(c) = self.chunk_size {
            config.chunk_size = c;
        }
        if let Some(t) = self.timeout {
            config.timeout = t;
        }
        if self.no_recursive {
            config.recursive = false;
        }
        if !self.not_found_codes.is_empty() {
            config.not_found_codes = self.not_found_codes.clone();
        }
        if let Some(s) = self.similarity {
            config.similarity_threshold = s;
        }
        if let Some(m) = self.max_targets {
            config.max_targets = m;
        }
        if let Some(ref o) = self.output {
            config.output = o.clone();
        }
        if let Some(ref s) = self.snapshot {
            config.snapshot = s.clone();
        }
        if self.resume {
            config.resume = true;
        }
        if let Some(ref p) = self.proxy {
            config.proxy = p.clone();
        }
        if !self.headers.is_empty() {
            config.headers = self.headers.join(";");
        }
        config.verbose |= self.verbose;
        config.dry_run |= self.dry_run;
    }
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) => match ScanConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprint!("{}\r\n", format!("[!] Failed to read config '{}': {}", path.display(), e).red());
                process::exit(1);
            }
        },
        None => ScanConfig::default(),
    };
    args.apply(&mut config);

    let level = if config.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    print_banner();

    let targets = match collect_targets(&config) {
        Ok(targets) => targets,
        Err(e) => {
            eprint!("{}\r\n", format!("[!] {}", e).red());
            process::exit(1);
        }
    };

    if targets.is_empty() {
        eprint!("{}\r\n", "[!] No targets specified. Provide a URL, -l <file> or -c <config>.".red());
        let mut cmd = Args::command();
        cmd.print_help().ok();
        process::exit(1);
    }

    if let Err(e) = run(&config, &targets).await {
        eprint!("{}\r\n", format!("[!] Scan aborted: {:#}", e).red());
        process::exit(1);
    }
}

fn collect_targets(config: &ScanConfig) -> anyhow::Result<Vec<String>> {
    let mut targets = Vec::new();
    if !config.list_file.is_empty() {
        let lines = CandidateList::file(&config.list_file).to_vec()?;
        print!(
            "{}\r\n",
            format!("[+] Loaded {} target(s) from {}", lines.len(), config.list_file).green().bold()
        );
        std::io::stdout().flush().ok();
        targets.extend(lines);
    }
    if !config.target.is_empty() {
        targets.push(config.target.clone());
    }
    Ok(targets)
}

fn print_banner() {
    let banner = r#"
   __   __ ___  ___  ___  _
   \ \ / /|_ _|/ __||_ _|| |
    \ V /  | || (_ | | | | |__
     \_/  |___|\___||___||____|
    "#;
    print!("{}\r\n", banner.bright_cyan().bold());
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

/// Scans every target in one session, so discoveries and findings are
/// shared between them.
async fn run(config: &ScanConfig, targets: &[String]) -> anyhow::Result<()> {
    config.validate()?;
    let plugins = config.build_plugins()?;

    if config.dry_run {
        for target in targets {
            println!("[DRY RUN] Would scan target: {}", target);
        }
        println!("[DRY RUN] Plugins: {}", plugins.names().join(", "));
        for (name, description) in plugins.describe() {
            println!("[DRY RUN]   {}: {}", name, description);
        }
        return Ok(());
    }

    print_scan_config(config, targets.len(), &plugins.names());

    let sink = ConsoleSink::new_ref();
    let client = Arc::new(HttpClient::new(config.timeout, config.proxy_ref(), &config.parsed_headers())?);
    let mut engine = ScanEngine::from_config(config, client, Arc::clone(&sink))?;
    for target in targets {
        if let Err(e) = engine.add_target(target) {
            sink.on_log("error", &format!("[!] Skipping invalid target '{}': {}", target, e));
        }
    }

    sink.on_log("phase", "\n[*] Scanning...");
    let report = engine.run().await?;

    sink.on_log(
        "info",
        &format!(
            "\n[*] {} target(s) scanned, {} probe(s) sent, {} target(s) over the limit",
            report.targets_scanned, report.probes, report.targets_dropped
        ),
    );
    ResultAggregator::report_summary(&report.findings, &sink);
    if let Some(path) = config.snapshot_path() {
        sink.on_log("info", &format!("[*] Session saved to {}", path.display()));
    }
    Ok(())
}

fn print_scan_config(config: &ScanConfig, targets: usize, plugins: &[&str]) {
    print!("{}\r\n", format!("[+] Targets:    {}", targets).green().bold());
    print!("{}\r\n", format!("[+] Workers:    {} (batches of {})", config.workers, config.chunk_size).blue());
    print!("{}\r\n", format!("[+] Timeout:    {}s", config.timeout).blue());
    print!("{}\r\n", format!("[+] Plugins:    {}", plugins.join(", ")).magenta().bold());
    if plugins.is_empty() {
        print!("{}\r\n", format!("[!] No plugin enabled; known plugins: {}", KNOWN_PLUGINS.join(", ")).yellow());
    }
    if !config.output.is_empty() {
        print!("{}\r\n", format!("[+] Output:     {}", config.output).blue());
    }
    if let Some(proxy) = config.proxy_ref() {
        print!("{}\r\n", format!("[+] Proxy:      {}", proxy).yellow());
    }
    let headers = config.header_list();
    if !headers.is_empty() {
        print!("{}\r\n", format!("[+] Headers:    {} custom", headers.len()).yellow());
    }
    if config.max_targets > 0 {
        print!("{}\r\n", format!("[+] Max targets: {}", config.max_targets).yellow());
    }
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}
