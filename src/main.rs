use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if handle_cli_flags(&args) {
        return;
    }

    install_tracing();

    if let Err(err) = glowfeed::run(&args) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "glowfeed=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn handle_cli_flags(args: &[String]) -> bool {
    let mut saw_flag = false;
    for arg in args {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("glowfeed {}", glowfeed::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!(
                    "glowfeed - threaded GlowSpace feed from the terminal.\n\n  feed                                   Show posts with their comment threads\n  post <body> [--image <url>]            Create a post\n  comment <post-id> <body>               Comment on a post\n  reply <post-id> <comment-id> <body>    Reply to a comment\n\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message"
                );
                saw_flag = true;
            }
            _ => {}
        }
    }
    saw_flag
}
