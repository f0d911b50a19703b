//! services/client/src/bin/study.rs
//!
//! Terminal client: browse sessions, follow them live, and take quizzes.

use chrono::Utc;
use clap::{Parser, Subcommand};
use client_lib::{
    adapters::{
        auth::SupabaseAuth,
        http::{ApiClient, ApiClientConfig},
        realtime::{RealtimeFeed, DEFAULT_HEARTBEAT_INTERVAL},
        records::PostgrestStore,
    },
    config::Config,
    error::ClientError,
    services::TransformsService,
    views::{
        DetailContent, QuizView, SessionDetail, SessionDetailView, SessionListView, ViewHandle,
        ViewOptions, ViewState,
    },
};
use std::io::Write;
use std::sync::Arc;
use study_assistant_core::{
    domain::{format_relative_time, Session},
    ports::{CredentialProvider, RecordStore},
    quiz::{format_duration, QuizPhase, QuizRunner},
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "study")]
#[command(about = "Browse study sessions and practice with generated quizzes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List your most recent sessions
    Sessions {
        /// Keep the list open and refresh it as sessions change
        #[arg(long)]
        watch: bool,
    },
    /// Show one session and its extracted text
    Session {
        id: Uuid,
        #[arg(long)]
        watch: bool,
    },
    /// Take the quiz for a session, generating it if needed
    Quiz { id: Uuid },
    /// List the transforms generated for a session
    Transforms { id: Uuid },
    /// Delete all transforms of a session
    Clear { id: Uuid },
}

type InputLines = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let cli = Cli::parse();

    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let auth = Arc::new(SupabaseAuth::new(
        &config.supabase_url,
        config.supabase_anon_key.clone(),
        config.request_timeout,
    )?);
    let (email, password) = match (&config.study_email, &config.study_password) {
        (Some(email), Some(password)) => (email, password),
        _ => {
            return Err(ClientError::Internal(
                "STUDY_EMAIL and STUDY_PASSWORD must be set".to_string(),
            ))
        }
    };
    let session = auth.sign_in_with_password(email, password).await?;
    let user_id = session.user.id;

    let credentials: Arc<dyn CredentialProvider> = auth.clone();
    let result = run(cli.command, &config, credentials, user_id).await;

    if let Err(e) = auth.sign_out().await {
        tracing::warn!("Sign-out failed: {}", e);
    }
    result
}

async fn run(
    command: Command,
    config: &Config,
    credentials: Arc<dyn CredentialProvider>,
    user_id: Uuid,
) -> Result<(), ClientError> {
    let store: Arc<dyn RecordStore> = Arc::new(PostgrestStore::new(
        &config.supabase_url,
        config.supabase_anon_key.clone(),
        credentials.clone(),
        config.request_timeout,
    )?);
    let options = ViewOptions {
        debounce: config.refetch_debounce,
        ..Default::default()
    };

    match command {
        Command::Sessions { watch: false } => {
            print_sessions(&store.list_sessions(user_id, options.session_limit).await?);
        }
        Command::Sessions { watch: true } => {
            let feed = connect_feed(config, credentials).await?;
            let view = SessionListView::mount(store, &feed, user_id, options).await?;
            follow(view, |sessions| print_sessions(sessions)).await;
            feed.close();
        }
        Command::Session { id, watch: false } => {
            let (session, output) =
                tokio::try_join!(store.get_session(id), store.get_output(id))?;
            print_detail(&SessionDetail { session, output });
        }
        Command::Session { id, watch: true } => {
            let feed = connect_feed(config, credentials).await?;
            let view = SessionDetailView::mount(store, &feed, id, options).await?;
            follow(view, print_detail).await;
            feed.close();
        }
        Command::Quiz { id } => {
            let service = transforms_service(config, credentials)?;
            println!("Loading quiz...");
            match QuizView::load(&service, id).await {
                ViewState::Ready(runner) => run_quiz(runner).await?,
                ViewState::Failed(message) => println!("Quiz unavailable: {}", message),
                ViewState::Loading => {}
            }
        }
        Command::Transforms { id } => {
            let service = transforms_service(config, credentials)?;
            let transforms = service.list_transforms(id).await?.into_result()?;
            if transforms.is_empty() {
                println!("No transforms yet.");
            }
            for transform in transforms {
                println!(
                    "{}  {:<10}  {}",
                    transform.id,
                    transform.transform_type.as_str(),
                    format_relative_time(transform.created_at, Utc::now())
                );
            }
        }
        Command::Clear { id } => {
            let service = transforms_service(config, credentials)?;
            let response = service.clear_transforms(id).await?;
            if !response.success {
                return Err(ClientError::Internal(
                    response
                        .error
                        .unwrap_or_else(|| "Failed to clear transforms".to_string()),
                ));
            }
            println!(
                "{}",
                response
                    .message
                    .unwrap_or_else(|| "Transforms cleared.".to_string())
            );
        }
    }
    Ok(())
}

async fn connect_feed(
    config: &Config,
    credentials: Arc<dyn CredentialProvider>,
) -> Result<RealtimeFeed, ClientError> {
    Ok(RealtimeFeed::connect(
        &config.supabase_url,
        &config.supabase_anon_key,
        credentials,
        DEFAULT_HEARTBEAT_INTERVAL,
    )
    .await?)
}

fn transforms_service(
    config: &Config,
    credentials: Arc<dyn CredentialProvider>,
) -> Result<TransformsService, ClientError> {
    let client = ApiClient::new(
        ApiClientConfig {
            base_url: config.backend_url.to_string(),
            timeout: config.request_timeout,
        },
        credentials,
    )?;
    Ok(TransformsService::new(Arc::new(client)))
}

/// Renders every state change of a mounted view until Ctrl-C, then unmounts it.
async fn follow<T, F>(view: ViewHandle<T>, render: F)
where
    T: PartialEq,
    F: Fn(&T),
{
    let mut state = view.subscribe();
    println!("Watching for changes. Press Ctrl-C to stop.");
    loop {
        match &*state.borrow_and_update() {
            ViewState::Loading => println!("Loading..."),
            ViewState::Ready(value) => render(value),
            ViewState::Failed(message) => println!("Error: {}", message),
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => if changed.is_err() { break },
        }
    }
    view.unmount();
    info!("View closed");
}

fn print_sessions(sessions: &[Session]) {
    if sessions.is_empty() {
        println!("No sessions yet.");
        return;
    }
    let now = Utc::now();
    for session in sessions {
        println!(
            "{}  {:<32}  {:<10}  {:<12}  {}",
            session.id,
            session.display_title(),
            session.status.label(),
            session.source.label(),
            format_relative_time(session.created_at, now)
        );
    }
}

fn print_detail(detail: &SessionDetail) {
    let session = &detail.session;
    println!("{} ({})", session.display_title(), session.status.label());
    if let Some(file_name) = &session.input_meta.file_name {
        println!("Source: {} ({})", session.source.label(), file_name);
    }
    match detail.content() {
        DetailContent::Processing => println!("Still processing..."),
        DetailContent::Failed(message) => println!("Processing failed: {}", message),
        DetailContent::Text(text) => println!("\n{}", text),
        DetailContent::Empty => println!("No content available."),
    }
}

async fn prompt(lines: &mut InputLines, text: &str) -> Result<Option<String>, ClientError> {
    print!("{}", text);
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?.map(|line| line.trim().to_string()))
}

async fn run_quiz(mut runner: QuizRunner) -> Result<(), ClientError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        while let Some(question) = runner.current_question().cloned() {
            let progress = runner.progress();
            println!(
                "\nQuestion {} of {}  (score {})",
                progress.current_question, progress.total_questions, progress.score
            );
            println!("{}", question.question);
            for (i, option) in question.options.iter().enumerate() {
                println!("  {}. {}", i + 1, option);
            }

            let Some(answer) = prompt(&mut lines, "Your answer: ").await? else {
                return Ok(());
            };
            let selected = match answer.parse::<usize>() {
                Ok(n) if n >= 1 => runner.select_option(n - 1),
                _ => {
                    println!("Enter an option number.");
                    continue;
                }
            };
            if let Err(e) = selected.and_then(|_| runner.submit_answer().map(|_| ())) {
                println!("{}", e);
                continue;
            }

            if let QuizPhase::FeedbackShown { correct, .. } = runner.phase() {
                if *correct {
                    println!("Correct!");
                } else {
                    println!(
                        "Incorrect. The answer is: {}",
                        question
                            .options
                            .get(question.correct_answer)
                            .map(String::as_str)
                            .unwrap_or("?")
                    );
                }
            }
            if let Some(explanation) = &question.explanation {
                println!("{}", explanation);
            }
            runner.next_question()?;
        }

        if let Some(summary) = runner.summary() {
            println!(
                "\nQuiz complete: {}/{} ({}%) in {}. {}",
                summary.score,
                summary.total_questions,
                summary.rounded_percentage(),
                format_duration(summary.time_spent),
                summary.grade().label()
            );
        }

        match prompt(&mut lines, "Try again? [y/N] ").await?.as_deref() {
            Some("y") | Some("Y") => runner.restart(),
            _ => return Ok(()),
        }
    }
}
