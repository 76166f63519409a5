use a11y_audit::cli;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "a11y-audit", version, about = "Audit every page of a sitemap for accessibility violations")]
struct Cli {
    /// Emit machine-readable JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Suppress progress and summaries.
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Debug-level logging and extra detail.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[arg(long, global = true)]
    no_color: bool,

    /// Structured JSON log lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one audit from a settings file.
    Run(cli::run_cmd::RunArgs),

    /// Resolve a sitemap and show which pages would be audited.
    Resolve {
        sitemap: String,

        #[arg(long, default_value_t = 50)]
        max_pages: usize,

        #[arg(long = "allow")]
        allow: Vec<String>,

        #[arg(long = "block")]
        block: Vec<String>,
    },

    /// List completed runs.
    Reports {
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Print shell completions.
    Completions { shell: Shell },
}

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose {
        "a11y_audit=debug"
    } else if cli.quiet || cli.json {
        "a11y_audit=warn"
    } else {
        "a11y_audit=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.with_ansi(!cli.no_color).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Output helpers read these instead of threading flags through every command.
    if cli.json {
        std::env::set_var("A11Y_JSON", "1");
    }
    if cli.quiet {
        std::env::set_var("A11Y_QUIET", "1");
    }
    if cli.verbose {
        std::env::set_var("A11Y_VERBOSE", "1");
    }
    if cli.no_color {
        std::env::set_var("A11Y_NO_COLOR", "1");
    }
    init_tracing(&cli);

    match cli.command {
        Command::Run(args) => cli::run_cmd::run(args).await,
        Command::Resolve {
            sitemap,
            max_pages,
            allow,
            block,
        } => cli::resolve_cmd::run(&sitemap, max_pages, &allow, &block).await,
        Command::Reports { output_dir } => cli::reports_cmd::run(output_dir),
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "a11y-audit", &mut std::io::stdout());
            Ok(())
        }
    }
}
