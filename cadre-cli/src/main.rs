mod config;
mod display;
mod runtime;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};

use cadre_core::agent::{ExecutorAgent, PlannerAgent};
use cadre_core::controller::{ControllerOptions, PlanController};
use cadre_core::events::{EventStream, StreamSubscriber};
use cadre_core::hub::FunctionHubClient;
use cadre_core::llm::OpenAiClient;
use cadre_core::logging::init_logging;
use cadre_core::memory::RecallMemory;
use cadre_core::prompts::PromptManager;
use cadre_types::{Action, ActionKind, AgentState, EventSource};

use config::{config_schema, load_config, CadreConfig};
use display::Display;
use runtime::LocalRuntime;

#[derive(Parser)]
#[command(name = "cadre", about = "Plan-and-delegate agent orchestrator")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "cadre.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an interactive session (the default)
    Run {
        /// Initial task; read from stdin when omitted
        task: Option<String>,
        /// Ask before running shell or code actions
        #[arg(long)]
        confirm: bool,
        /// Repository to work in; commands run from this directory
        #[arg(long)]
        repo: Option<PathBuf>,
    },
    /// Print the JSON schema of the configuration file
    ConfigSchema {
        #[arg(long)]
        pretty: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_logging("warn");

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run {
        task: None,
        confirm: false,
        repo: None,
    });

    match command {
        Commands::ConfigSchema { pretty } => {
            println!("{}", config_schema(pretty)?);
            Ok(())
        }
        Commands::Run {
            task,
            confirm,
            repo,
        } => {
            let mut config = load_config(&cli.config)?;
            if confirm {
                config.confirmation_mode = true;
            }
            run_session(config, task, repo).await
        }
    }
}

async fn run_session(
    config: CadreConfig,
    task: Option<String>,
    repo: Option<PathBuf>,
) -> Result<()> {
    let session_id = uuid::Uuid::new_v4().to_string();
    println!("Session ID: {}\n", session_id);

    let hub = match &config.functionhub {
        Some(hub_config) => Some(FunctionHubClient::new(hub_config.clone())?),
        None => None,
    };

    let stream = Arc::new(EventStream::new(session_id.clone()));
    RecallMemory::new(stream.clone()).attach(&session_id);
    LocalRuntime::attach(stream.clone(), hub.clone(), repo);
    stream.subscribe(StreamSubscriber::Main, Arc::new(Display), "display");

    let llm = Arc::new(OpenAiClient::new(config.llm.clone()));
    let planner = Arc::new(PlannerAgent::new(
        "planner",
        config.agent.clone(),
        llm.clone(),
        PromptManager::planner(),
    ));
    let executor = Arc::new(ExecutorAgent::new(
        "executor",
        config.agent.clone(),
        llm,
        hub,
        PromptManager::executor(),
    ));

    let options = ControllerOptions {
        sid: Some(session_id),
        max_iterations: config.max_iterations,
        max_budget_per_task: config.max_budget_per_task,
        confirmation_mode: config.confirmation_mode,
        headless_mode: false,
        initial_state: None,
        status_callback: Some(Arc::new(|severity, code, message| {
            if severity == "error" {
                eprintln!("[{}] {}", code, message);
            }
        })),
    };
    let controller =
        PlanController::new(planner, executor, stream.clone(), options, None).await;

    let mut input = BufReader::new(tokio::io::stdin()).lines();

    match task {
        Some(task) => {
            stream.publish(Action::message(task), EventSource::User).await;
        }
        None => {
            let Some(first) = prompt(&mut input).await? else {
                return Ok(());
            };
            stream.publish(Action::message(first), EventSource::User).await;
        }
    }

    loop {
        let state = controller
            .wait_for(&[
                AgentState::AwaitingUserInput,
                AgentState::AwaitingUserConfirmation,
                AgentState::Paused,
                AgentState::Finished,
                AgentState::Rejected,
                AgentState::Error,
                AgentState::Stopped,
            ])
            .await;

        match state {
            AgentState::Error => {
                controller.close(false).await;
                eprintln!("Session ended with an error.");
                std::process::exit(1);
            }
            AgentState::Stopped | AgentState::Rejected => break,
            AgentState::AwaitingUserConfirmation => {
                println!("Confirm action (possible security risk)? (y/n)");
                let answer = prompt(&mut input).await?.unwrap_or_default();
                let decision = if answer.trim().eq_ignore_ascii_case("y") {
                    AgentState::UserConfirmed
                } else {
                    AgentState::UserRejected
                };
                stream
                    .publish(
                        Action::new(ActionKind::ChangeAgentState {
                            agent_state: decision,
                        }),
                        EventSource::User,
                    )
                    .await;
                // let the decision propagate before polling again
                controller
                    .wait_for(&[
                        AgentState::Running,
                        AgentState::AwaitingUserInput,
                        AgentState::Finished,
                        AgentState::Stopped,
                        AgentState::Error,
                    ])
                    .await;
            }
            AgentState::Paused => {
                println!("Budget reached. Press enter to resume, or type exit.");
                match prompt(&mut input).await? {
                    Some(line) if line.trim() == "exit" => break,
                    Some(_) => {
                        stream
                            .publish(
                                Action::new(ActionKind::ChangeAgentState {
                                    agent_state: AgentState::Running,
                                }),
                                EventSource::User,
                            )
                            .await;
                        controller
                            .wait_for(&[
                                AgentState::Running,
                                AgentState::Stopped,
                                AgentState::Error,
                            ])
                            .await;
                    }
                    None => break,
                }
            }
            // Finished or awaiting input: ask for the next task.
            _ => match prompt(&mut input).await? {
                Some(line) if line.trim() == "exit" => {
                    stream
                        .publish(
                            Action::new(ActionKind::ChangeAgentState {
                                agent_state: AgentState::Stopped,
                            }),
                            EventSource::User,
                        )
                        .await;
                    controller.wait_for(&[AgentState::Stopped]).await;
                    break;
                }
                Some(line) => {
                    stream.publish(Action::message(line), EventSource::User).await;
                    controller
                        .wait_for(&[
                            AgentState::Running,
                            AgentState::Stopped,
                            AgentState::Error,
                        ])
                        .await;
                }
                None => break,
            },
        }
    }

    controller.close(true).await;
    stream.close();
    Ok(())
}

/// Read one non-empty line from stdin; `None` on EOF.
async fn prompt(
    input: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
) -> Result<Option<String>> {
    loop {
        print!("> ");
        use std::io::Write;
        std::io::stdout().flush()?;
        match input.next_line().await? {
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => return Ok(Some(line)),
            None => return Ok(None),
        }
    }
}
