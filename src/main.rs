//! pollsync: drive the offline-first poll data layer from a terminal.
//!
//! Usage: pollsync <command> [args]

use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use tracing_subscriber::{fmt, EnvFilter};

use pollsync::models::{NewPoll, Poll};
use pollsync::sync::Reconciler;
use pollsync::{Config, PollClient, PollError};

const USAGE: &str = "\
Usage: pollsync <command> [args]

Commands:
  login <student-id>           Log in (offline falls back to a local identity)
  logout                       Forget the current identity
  whoami                       Show the current identity
  polls                        List polls
  poll <poll-id>               Show one poll
  results <poll-id>            Show vote tallies
  vote <poll-id> <option-id>   Cast a vote
  check <poll-id>              Has the current identity voted?
  votes                        List the current identity's recorded votes
  create <title> <option>...   Create a poll (admin, online only)
      [--description <text>] [--ends <YYYY-MM-DD | RFC 3339>]
  sync                         Deliver queued votes now
  pending                      List queued votes
  watch                        Keep delivering queued votes until Ctrl-C";

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || matches!(args[0].as_str(), "-h" | "--help" | "help") {
        println!("{}", USAGE);
        return ExitCode::SUCCESS;
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config);

    let client = match PollClient::from_config(&config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to open local store: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&client, &config, &args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            match e.downcast_ref::<PollError>() {
                Some(PollError::Validation(_)) => ExitCode::from(2),
                Some(err) if err.is_remote() => ExitCode::from(3),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(client: &PollClient, config: &Config, args: &[String]) -> Result<()> {
    let arg = |i: usize, name: &str| -> Result<String> {
        args.get(i)
            .cloned()
            .ok_or_else(|| usage_error(&format!("missing <{}>", name)))
    };

    match args[0].as_str() {
        "login" => cmd_login(client, &arg(1, "student-id")?).await,
        "logout" => {
            client.logout()?;
            println!("Logged out");
            Ok(())
        }
        "whoami" => cmd_whoami(client),
        "polls" => cmd_polls(client).await,
        "poll" => cmd_poll(client, &arg(1, "poll-id")?).await,
        "results" => cmd_results(client, &arg(1, "poll-id")?).await,
        "vote" => cmd_vote(client, &arg(1, "poll-id")?, &arg(2, "option-id")?).await,
        "check" => cmd_check(client, &arg(1, "poll-id")?).await,
        "votes" => cmd_votes(client),
        "create" => cmd_create(client, &parse_new_poll(&args[1..])?).await,
        "sync" => {
            let synced = client.sync_pending_votes().await;
            let left = client.queue().len()?;
            println!("Delivered {} queued vote(s), {} still pending", synced, left);
            Ok(())
        }
        "pending" => cmd_pending(client),
        "watch" => cmd_watch(client, config).await,
        other => Err(usage_error(&format!("unknown command '{}'", other))),
    }
}

fn usage_error(message: &str) -> anyhow::Error {
    PollError::Validation(format!("{}\n\n{}", message, USAGE)).into()
}

async fn cmd_login(client: &PollClient, student_id: &str) -> Result<()> {
    let outcome = client.login(student_id).await?;
    let mode = if outcome.is_local { "local only" } else { "server session" };
    println!(
        "Logged in as {} ({}) [{}]",
        outcome.identity.display_name, outcome.identity.id, mode
    );
    if outcome.synced > 0 {
        println!("Delivered {} queued vote(s)", outcome.synced);
    }
    Ok(())
}

fn cmd_whoami(client: &PollClient) -> Result<()> {
    let identity = client.current_identity().ok_or(PollError::Unauthenticated)?;
    let token = if client.identity().token().is_some() { "yes" } else { "no" };
    println!("id:          {}", identity.id);
    println!("name:        {}", identity.display_name);
    println!("local only:  {}", identity.is_local_only);
    println!("admin:       {}", identity.is_admin);
    println!("session:     {}", client.identity().is_authenticated());
    println!("token:       {}", token);
    Ok(())
}

async fn cmd_polls(client: &PollClient) -> Result<()> {
    let polls = client.get_polls().await;
    if polls.is_empty() {
        println!("No polls available");
        return Ok(());
    }
    let now = Utc::now();
    for poll in &polls {
        let mut flags = Vec::new();
        if poll.is_closed(now) {
            flags.push("closed");
        }
        if client.has_voted(&poll.id) {
            flags.push("voted");
        }
        let suffix = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!("{:>6}  {}{}", poll.id, poll.title, suffix);
    }
    Ok(())
}

async fn cmd_poll(client: &PollClient, poll_id: &str) -> Result<()> {
    let poll = client
        .get_poll_by_id(poll_id)
        .await
        .ok_or_else(|| PollError::NotFound(poll_id.to_string()))?;
    print_poll(&poll);

    if let Some(record) = client.ledger().vote_record(poll_id) {
        println!(
            "\nYou voted for option {} at {}",
            record.option_id,
            record.voted_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn print_poll(poll: &Poll) {
    println!("{} (#{})", poll.title, poll.id);
    if !poll.description.is_empty() {
        println!("{}", poll.description);
    }
    if let Some(end) = poll.end_date {
        println!("Ends: {}", end.format("%Y-%m-%d %H:%M UTC"));
    }
    println!();
    for option in &poll.options {
        println!("  {:>4}  {}", option.id, option.text);
    }
}

async fn cmd_results(client: &PollClient, poll_id: &str) -> Result<()> {
    let results = client
        .get_poll_results(poll_id)
        .await
        .ok_or_else(|| PollError::NotFound(poll_id.to_string()))?;
    println!("{} ({} votes)", results.poll.title, results.total_votes());
    for option in &results.options {
        println!(
            "  {:>4}  {:<30} {:>5}  {:5.1}%",
            option.id,
            option.text,
            option.votes,
            results.share(&option.id)
        );
    }
    Ok(())
}

async fn cmd_vote(client: &PollClient, poll_id: &str, option_id: &str) -> Result<()> {
    if client.has_voted(poll_id) {
        println!("Note: replacing your earlier vote on poll {}", poll_id);
    }
    let outcome = client.vote(poll_id, option_id).await?;
    if outcome.synced {
        println!("Vote recorded");
    } else {
        println!("Vote saved offline; it will be sent when the server is reachable");
    }
    Ok(())
}

async fn cmd_check(client: &PollClient, poll_id: &str) -> Result<()> {
    client.current_identity().ok_or(PollError::Unauthenticated)?;
    let check = client.check_vote(poll_id).await;
    if check.has_voted {
        println!("You have voted on poll {}", poll_id);
    } else {
        println!("You have not voted on poll {}", poll_id);
    }
    Ok(())
}

fn cmd_votes(client: &PollClient) -> Result<()> {
    let identity = client.current_identity().ok_or(PollError::Unauthenticated)?;
    let mut records = client.ledger().records_for(&identity.id)?;
    if records.is_empty() {
        println!("No votes recorded");
        return Ok(());
    }
    records.sort_by(|a, b| a.1.voted_at.cmp(&b.1.voted_at));

    let pending = client.queue().pending_for(&identity.id)?;
    for (poll_id, record) in &records {
        let state = if pending.iter().any(|vote| &vote.poll_id == poll_id) {
            "queued"
        } else {
            "sent"
        };
        println!(
            "poll {:>6}  option {:>6}  {}  {}",
            poll_id,
            record.option_id,
            record.voted_at.format("%Y-%m-%d %H:%M"),
            state
        );
    }
    Ok(())
}

async fn cmd_create(client: &PollClient, poll: &NewPoll) -> Result<()> {
    let poll_id = client.create_poll(poll).await?;
    println!("Created poll {}", poll_id);
    Ok(())
}

/// `<title> <option>... [--description <text>] [--ends <date>]`
fn parse_new_poll(args: &[String]) -> Result<NewPoll> {
    let mut positional = Vec::new();
    let mut description = String::new();
    let mut end_date = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--description" | "-d" => {
                description = iter
                    .next()
                    .cloned()
                    .ok_or_else(|| usage_error("missing value for --description"))?;
            }
            "--ends" => {
                let raw = iter
                    .next()
                    .ok_or_else(|| usage_error("missing value for --ends"))?;
                end_date = Some(parse_end_date(raw)?);
            }
            _ => positional.push(arg.clone()),
        }
    }

    let mut positional = positional.into_iter();
    let title = positional
        .next()
        .ok_or_else(|| usage_error("missing <title>"))?;
    Ok(NewPoll {
        title,
        description,
        end_date,
        options: positional.collect(),
    })
}

/// RFC 3339, or a bare date meaning the end of that day in UTC.
fn parse_end_date(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| usage_error(&format!("unrecognised date '{}'", raw)))
}

fn cmd_pending(client: &PollClient) -> Result<()> {
    let pending = client.queue().snapshot()?;
    if pending.is_empty() {
        println!("Nothing queued");
        return Ok(());
    }
    for vote in &pending {
        println!(
            "poll {:>6}  option {:>6}  by {:<12} queued {}",
            vote.poll_id,
            vote.option_id,
            vote.identity_id,
            vote.queued_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn cmd_watch(client: &PollClient, config: &Config) -> Result<()> {
    if !config.sync.enabled {
        let reason = "background sync is disabled in config ([sync] enabled)";
        return Err(PollError::Validation(reason.to_string()).into());
    }
    let interval = config.sync.interval();
    let reconciler = Reconciler::spawn(client.clone(), interval);
    println!(
        "Delivering queued votes every {}s, Ctrl-C to stop",
        interval.as_secs()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    reconciler.shutdown().await;

    println!("{} vote(s) still pending", client.queue().len()?);
    Ok(())
}
