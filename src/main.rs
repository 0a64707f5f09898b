//! Agentry CLI binary entry point.

use std::io::{BufRead, Write};

use agentry::app::{Application, Command, CommandOutput};
use agentry::cli::{init_logging, render_output, Cli};
use agentry::config::AgentryConfig;
use agentry::history::HistoryBackend;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AgentryConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.agents_dir {
        config.set_agents_dir(dir);
    }
    if let Some(user) = cli.user {
        config.set_user_id(user);
    }
    if cli.verbose {
        config.set_verbose(true);
    }

    let log_dir = config.log_dir().map(|d| d.to_path_buf());
    let mut app = Application::new(config)?;
    if cli.in_memory {
        app = app.with_history(HistoryBackend::Memory { log_dir });
    }

    if let Some(script) = cli.autotest {
        for exchange in app.autotest(&script).await? {
            println!("> {}", exchange.question);
            println!("{}\n", exchange.answer.as_deref().unwrap_or("(no answer)"));
        }
        app.shutdown().await;
        return Ok(());
    }

    let agent = match cli.agent {
        Some(agent) => agent,
        None => app
            .list_agents()
            .first()
            .map(|a| a.name.clone())
            .ok_or("no agents found")?,
    };
    let session = app.open(&agent).await?;
    let mut bot = session.manifest().bot().to_string();
    let you = session.manifest().you().to_string();
    if let Some(intro) = session.intro() {
        println!("{bot}: {intro}");
    }

    if let Some(list) = cli.run {
        for output in app.run_commands(&list).await? {
            match render_output(&bot, &output) {
                Some(text) => println!("{text}"),
                None => {
                    app.shutdown().await;
                    return Ok(());
                }
            }
        }
    }

    let stdin = std::io::stdin();
    loop {
        print!("{you}: ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let command = match Command::parse_line(&line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        match app.execute(command).await {
            Ok(CommandOutput::Exit) => break,
            Ok(output) => {
                if let Some(session) = app.session() {
                    bot = session.manifest().bot().to_string();
                }
                if let Some(text) = render_output(&bot, &output) {
                    println!("{text}");
                }
            }
            Err(e) => eprintln!("Error: {e}"),
        }
    }

    app.shutdown().await;
    Ok(())
}
