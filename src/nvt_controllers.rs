// Controllers for the live route tracker
use crate::nvt_config::{NVTArgs, load_operators};
use crate::nvt_models::NVTError;
use crate::nvt_session::{SessionState, TickOutcome, default_estimators};
use crate::nvt_sources::{HttpSource, TransitSource};
use crate::nvt_views::{ConsoleMap, MapSurface, NVTViews};
use anyhow::Context;
use chrono::Utc;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc::{self, UnboundedReceiver};

lazy_static! {
    static ref COMMAND_RE: Regex =
        Regex::new(r"^\s*(?i:(o|operator|r|route|d|direction|s|status|h|help|q|quit))(?:\s+(\S+))?\s*$")
            .expect("command pattern is valid");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Operator(String),
    Route(String),
    ToggleDirection,
    Status,
    Help,
    Quit,
}

impl Command {
    pub fn parse(input: &str) -> Option<Command> {
        let caps = COMMAND_RE.captures(input)?;
        let verb = caps.get(1)?.as_str().to_ascii_lowercase();
        let arg = caps.get(2).map(|m| m.as_str().to_string());

        match (verb.as_str(), arg) {
            ("o" | "operator", Some(code)) => Some(Command::Operator(code)),
            ("r" | "route", Some(route)) => Some(Command::Route(route)),
            ("d" | "direction", None) => Some(Command::ToggleDirection),
            ("s" | "status", None) => Some(Command::Status),
            ("h" | "help", None) => Some(Command::Help),
            ("q" | "quit", None) => Some(Command::Quit),
            _ => None,
        }
    }
}

pub struct NVTControllers;

impl NVTControllers {
    /// Main application loop
    pub async fn run(args: NVTArgs) -> anyhow::Result<()> {
        let operators = load_operators(args.operators.as_deref())?;
        let source = Arc::new(HttpSource::new(operators).context("Failed to set up data sources")?);

        let listing: Vec<(String, String)> = source.operators().into_iter().map(|p| (p.code, p.name)).collect();
        NVTViews::show_welcome_screen(&listing);
        NVTViews::show_help();

        let map = ConsoleMap::new(args.timezone, args.geojson_out.clone());
        let (mut session, mut ticks) =
            SessionState::new(source, map, args.poll_interval(), default_estimators(args.seed));

        Self::report(
            session
                .open(args.operator.as_deref(), args.route.as_deref(), args.direction)
                .await,
        );
        if let Some(selection) = session.selection() {
            debug!("Tracking {} from startup arguments", selection);
        }

        let mut commands = Self::spawn_input_reader();
        NVTViews::prompt();

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(line) = command else {
                        debug!("Input closed");
                        break;
                    };
                    if !Self::handle_input(&mut session, &line).await {
                        break;
                    }
                    NVTViews::prompt();
                }
                Some(fetch) = ticks.recv() => {
                    match session.apply_tick(fetch, Utc::now()) {
                        TickOutcome::Stale => debug!("Ignored a result for a previous route"),
                        TickOutcome::Overtaken => debug!("Ignored a late result, a newer one is shown"),
                        TickOutcome::Applied(_) => {}
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    debug!("Interrupted");
                    break;
                }
            }
        }

        session.shutdown();
        NVTViews::goodbye_message();
        Ok(())
    }

    /// Returns `false` when the user asked to quit.
    async fn handle_input<S, M>(session: &mut SessionState<S, M>, line: &str) -> bool
    where
        S: TransitSource,
        M: MapSurface,
    {
        if line.trim().is_empty() {
            return true;
        }

        match Command::parse(line) {
            Some(Command::Operator(code)) => match session.on_operator_change(&code).await {
                Err(NVTError::ConfigError(_)) => NVTViews::unknown_operator(&code),
                other => Self::report(other),
            },
            Some(Command::Route(route)) => Self::report(session.on_route_change(&route).await),
            Some(Command::ToggleDirection) => Self::report(session.on_direction_toggle().await),
            Some(Command::Status) => NVTViews::show_selection(
                session.operator().map(|p| p.code.as_str()),
                session.route(),
                session.direction().as_path(),
                session.stops().len(),
                session.vehicle_count(),
                session.active_context().map(|c| c.to_string()),
            ),
            Some(Command::Help) => NVTViews::show_help(),
            Some(Command::Quit) => return false,
            None => NVTViews::invalid_command(line.trim()),
        }
        true
    }

    fn report(result: crate::nvt_models::Result<()>) {
        if let Err(e) = result {
            warn!("{}", e);
        }
    }

    /// Read stdin on a plain thread; lines arrive on the returned channel.
    fn spawn_input_reader() -> UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        eprintln!("⚠️  Error reading input: {}", e);
                        break;
                    }
                }
            }
        });
        rx
    }
}
