//! The `liftup shell` command: an interactive session that wires the store, the session binder,
//! the error channel and the advisor to the in-process backend.

use crate::advisor::FinancialAdvisor;
use crate::api::{self, Advisor, Identity, LocalBackend, Mode};
use crate::args::{ShellCommand, ShellLine, TransactionFields};
use crate::auth::{AuthForm, Submission};
use crate::channel::{ErrorChannel, EventName};
use crate::commands::Out;
use crate::model::{articles, Article, Summary, Transaction, TransactionInput};
use crate::session::{History, Route, SessionBinder};
use crate::store::{TransactionStore, WriteResult};
use crate::{Config, Result};
use anyhow::Context;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt::Write as _;
use std::io::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const PROMPT: &str = "liftup> ";

/// Totals reported when the session ends.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub permission_errors: usize,
    pub transactions: usize,
}

/// Runs the interactive session on stdin until `quit` or end of input.
pub async fn shell(config: Config, mode: Mode, seed: bool) -> Result<Out<SessionReport>> {
    let advisor = api::advisor(&config, mode).map(Arc::<dyn Advisor>::from);
    if let Err(e) = &advisor {
        warn!("The advisor is unavailable for this session: {e:#}");
    }
    let mut shell = Shell::new(LocalBackend::new(), advisor, seed);
    println!("Welcome to liftup. Type `help` to see the available commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{PROMPT}");
        std::io::stdout().flush().context("Unable to write to stdout")?;
        let Some(line) = lines
            .next_line()
            .await
            .context("Unable to read from stdin")?
        else {
            break;
        };
        match shell.execute(&line).await {
            Ok(Some(output)) if output.is_empty() => {}
            Ok(Some(output)) => println!("{output}"),
            Ok(None) => break,
            Err(e) => println!("{e:#}"),
        }
    }

    let report = shell.report();
    Ok(Out::new("Session closed", report))
}

/// One interactive session. Each call to `execute` handles one line.
pub struct Shell {
    backend: LocalBackend,
    store: TransactionStore,
    binder: Arc<SessionBinder>,
    binder_task: JoinHandle<()>,
    form: AuthForm,
    advisor: std::result::Result<FinancialAdvisor, String>,
    seed: bool,
    permission_errors: Arc<AtomicUsize>,
}

impl Shell {
    /// Wires a session to `backend`. Must be called from within a Tokio runtime.
    pub fn new(backend: LocalBackend, advisor: Result<Arc<dyn Advisor>>, seed: bool) -> Self {
        let channel = ErrorChannel::new();
        channel.log_permission_errors();
        let permission_errors = Arc::new(AtomicUsize::new(0));
        let counter = permission_errors.clone();
        channel.on(EventName::PermissionError, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let store = TransactionStore::new(Arc::new(backend.clone()), channel);
        let binder = Arc::new(SessionBinder::new(
            store.clone(),
            Arc::new(History::default()),
        ));
        let auth_state = backend.auth_state();
        binder.apply(auth_state.borrow().clone());
        let runner = binder.clone();
        let binder_task = tokio::spawn(async move { runner.run(auth_state).await });

        Self {
            form: AuthForm::new(Arc::new(backend.clone())),
            backend,
            store,
            binder,
            binder_task,
            advisor: advisor
                .map(FinancialAdvisor::new)
                .map_err(|e| format!("{e:#}")),
            seed,
            permission_errors,
        }
    }

    pub fn store(&self) -> &TransactionStore {
        &self.store
    }

    pub fn route(&self) -> Route {
        self.binder.route()
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            permission_errors: self.permission_errors.load(Ordering::SeqCst),
            transactions: self.store.transactions().len(),
        }
    }

    /// Handles one line. Returns the text to show, or `None` when the session should end. A line
    /// that does not parse is answered with the usage text instead of an error.
    pub async fn execute(&mut self, line: &str) -> Result<Option<String>> {
        if line.trim().is_empty() {
            return Ok(Some(String::new()));
        }
        let parsed = match ShellLine::parse_line(line) {
            Ok(parsed) => parsed,
            Err(e) => return Ok(Some(e.to_string().trim_end().to_string())),
        };
        debug!("Shell command: {:?}", parsed.command());

        let output = match parsed.command().clone() {
            ShellCommand::Signup { email, password } => {
                self.binder.detach();
                let submission = self.form.sign_up(&email, &password).await;
                if let Some(user) = &submission.user {
                    if self.seed {
                        let ids = self.backend.seed_demo(user.uid())?;
                        debug!("Seeded {} demo transactions", ids.len());
                    }
                }
                self.after_auth(submission)
            }
            ShellCommand::Login { email, password } => {
                self.binder.detach();
                let submission = self.form.sign_in(&email, &password).await;
                self.after_auth(submission)
            }
            ShellCommand::Logout => {
                self.binder.detach();
                let result = self.store.logout(&self.backend).await;
                self.binder.apply(None);
                match result {
                    Ok(()) => format!("Signed out. Route: {}", self.route()),
                    Err(e) => format!("Signed out locally, but the provider failed: {e}"),
                }
            }
            ShellCommand::Goto { route } => {
                let landed = self.binder.navigate(Route::parse(&route));
                format!("Route: {landed}")
            }
            ShellCommand::Add(fields) => {
                let uid = self.require_user()?;
                let input = to_input(&fields)?;
                let result = self.store.add_transaction(&uid, &input).settled().await;
                describe_write("Created", result)
            }
            ShellCommand::Update { id, fields } => {
                let uid = self.require_user()?;
                let existing = self
                    .store
                    .transactions()
                    .into_iter()
                    .find(|t| t.id() == id)
                    .with_context(|| format!("There is no transaction with id {id}"))?;
                let edited = existing.with_input(to_input(&fields)?);
                let result = self.store.update_transaction(&uid, &edited).settled().await;
                describe_write("Updated", result.map(|_| Some(id)))
            }
            ShellCommand::Delete { id } => {
                let uid = self.require_user()?;
                let result = self.store.delete_transaction(&uid, &id).settled().await;
                describe_write("Deleted", result.map(|_| Some(id)))
            }
            ShellCommand::List => list(&self.store.transactions()),
            ShellCommand::Summary => summary(&Summary::from_transactions(
                &self.store.transactions(),
            )),
            ShellCommand::Ask { question } => match &mut self.advisor {
                Ok(advisor) => advisor
                    .ask(&question.join(" "))
                    .await
                    .map(|m| m.text().to_string())
                    .unwrap_or_default(),
                Err(reason) => format!("The advisor is unavailable: {reason}"),
            },
            ShellCommand::Articles => catalog(articles()),
            ShellCommand::Error => self
                .store
                .error()
                .unwrap_or_else(|| "No errors".to_string()),
            ShellCommand::ClearError => {
                self.store.clear_error();
                "Error cleared".to_string()
            }
            ShellCommand::Quit => return Ok(None),
        };
        Ok(Some(output))
    }

    /// Applies the outcome of a sign-in or sign-up and describes it.
    fn after_auth(&self, submission: Submission) -> String {
        // A failed attempt leaves the previous session in place, so follow it again.
        let user = submission
            .user
            .clone()
            .or_else(|| self.backend.auth_state().borrow().clone());
        self.binder.apply(user);
        format!("{}\nRoute: {}", submission.notification, self.route())
    }

    fn require_user(&self) -> Result<String> {
        self.store
            .user()
            .map(|u| u.uid().to_string())
            .context("Sign in first with `login <email> <password>`")
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        self.binder_task.abort();
    }
}

fn to_input(fields: &TransactionFields) -> Result<TransactionInput> {
    let date = match fields.date {
        Some(day) => day
            .and_hms_opt(12, 0, 0)
            .context("Invalid time of day")?
            .and_utc(),
        None => Utc::now(),
    };
    TransactionInput::new(
        fields.transaction_type,
        fields.amount,
        fields.description.clone(),
        date,
    )
}

fn describe_write(verb: &str, result: WriteResult) -> String {
    match result {
        Ok(Some(id)) => format!("{verb} {id}"),
        Ok(None) => verb.to_string(),
        Err(e) => format!("The request was rejected: {e}"),
    }
}

fn list(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return "No transactions yet".to_string();
    }
    let mut out = String::new();
    for t in transactions {
        let _ = writeln!(
            out,
            "{}  {:<7}  {:>12}  {}  [{}]",
            t.date().format("%Y-%m-%d"),
            t.transaction_type().to_string(),
            t.amount().to_string(),
            t.description(),
            t.id()
        );
    }
    out.trim_end().to_string()
}

fn catalog(articles: &[Article]) -> String {
    let mut out = String::new();
    for article in articles {
        let _ = writeln!(out, "[{}] {}", article.category, article.title);
        let _ = writeln!(out, "    {}", article.description);
    }
    out.trim_end().to_string()
}

fn summary(summary: &Summary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Income:  {:>12}", money(summary.income));
    let _ = writeln!(out, "Expense: {:>12}", money(summary.expense));
    let _ = writeln!(out, "Balance: {:>12}", money(summary.balance));
    for month in &summary.months {
        let _ = writeln!(
            out,
            "{}  income {:>12}  expense {:>12}",
            month.month,
            money(month.income),
            money(month.expense)
        );
    }
    out.trim_end().to_string()
}

fn money(value: Decimal) -> String {
    let formatted = format_num::format_num!(",.2", value.abs().to_f64().unwrap_or_default());
    if value.is_sign_negative() && !value.is_zero() {
        format!("-${formatted}")
    } else {
        format!("${formatted}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ScriptedAdvisor;
    use crate::store::StoreState;
    use std::time::Duration;

    fn shell(seed: bool) -> Shell {
        let advisor: Arc<dyn Advisor> =
            Arc::new(ScriptedAdvisor::new().reply("Anota cada gasto."));
        Shell::new(LocalBackend::new(), Ok(advisor), seed)
    }

    async fn wait_for<F>(shell: &Shell, predicate: F) -> StoreState
    where
        F: FnMut(&StoreState) -> bool,
    {
        let mut rx = shell.store().watch();
        let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
            .await
            .unwrap()
            .unwrap();
        let snapshot = (*state).clone();
        snapshot
    }

    async fn run(shell: &mut Shell, line: &str) -> String {
        shell.execute(line).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_session_flow() {
        let mut shell = shell(false);
        assert_eq!(run(&mut shell, "goto /dashboard").await, "Route: /");

        let out = run(&mut shell, "signup a@b.com secret1").await;
        assert!(out.contains("Registro exitoso"), "{out}");
        assert!(out.ends_with("Route: /dashboard"), "{out}");

        let out = run(&mut shell, r#"add income 50 "venta de tacos" --date 2024-02-01"#).await;
        assert!(out.starts_with("Created "), "{out}");
        wait_for(&shell, |s| s.transactions().len() == 1).await;
        let out = run(&mut shell, "list").await;
        assert!(out.contains("2024-02-01"), "{out}");
        assert!(out.contains("venta de tacos"), "{out}");
        assert!(out.contains("$50.00"), "{out}");

        let id = shell.store().transactions()[0].id().to_string();
        let out = run(&mut shell, &format!("update {id} expense 20 insumos --date 2024-02-02")).await;
        assert_eq!(out, format!("Updated {id}"));
        wait_for(&shell, |s| {
            s.transactions()
                .first()
                .is_some_and(|t| t.description() == "insumos")
        })
        .await;

        let out = run(&mut shell, "summary").await;
        assert!(out.contains("Balance:"), "{out}");
        assert!(out.contains("-$20.00"), "{out}");
        assert!(out.contains("2024-02"), "{out}");

        run(&mut shell, &format!("delete {id}")).await;
        wait_for(&shell, |s| s.transactions().is_empty()).await;
        assert_eq!(run(&mut shell, "list").await, "No transactions yet");

        let out = run(&mut shell, "logout").await;
        assert_eq!(out, "Signed out. Route: /");
        assert_eq!(shell.report().permission_errors, 0);
        assert!(shell.execute("quit").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_seeded_signup_and_relogin() {
        let mut shell = shell(true);
        run(&mut shell, "signup a@b.com secret1").await;
        wait_for(&shell, |s| s.transactions().len() == 10).await;
        run(&mut shell, "logout").await;
        assert!(shell.store().transactions().is_empty());

        let out = run(&mut shell, "login a@b.com wrong!").await;
        assert!(out.contains("Credenciales incorrectas."), "{out}");
        assert!(out.ends_with("Route: /"), "{out}");

        let out = run(&mut shell, "login a@b.com secret1").await;
        assert!(out.contains("Inicio de sesión exitoso"), "{out}");
        wait_for(&shell, |s| s.transactions().len() == 10).await;
        assert_eq!(shell.report().permission_errors, 0);
    }

    #[tokio::test]
    async fn test_failed_login_keeps_session() {
        let mut shell = shell(true);
        run(&mut shell, "signup a@b.com secret1").await;
        wait_for(&shell, |s| s.transactions().len() == 10).await;

        run(&mut shell, "login a@b.com wrong!").await;
        assert_eq!(shell.route(), Route::Dashboard);
        run(&mut shell, "add expense 5 chicles").await;
        wait_for(&shell, |s| s.transactions().len() == 11).await;
    }

    #[tokio::test]
    async fn test_requires_sign_in() {
        let mut shell = shell(false);
        let err = shell.execute("add income 5 x").await.unwrap_err();
        assert!(err.to_string().contains("Sign in first"));
        assert_eq!(run(&mut shell, "error").await, "No errors");
    }

    #[tokio::test]
    async fn test_articles_need_no_account() {
        let mut shell = shell(false);
        let out = run(&mut shell, "articles").await;
        assert!(out.starts_with("[Formalización] 5 Pasos"), "{out}");
        assert_eq!(out.lines().count(), 10);
    }

    #[tokio::test]
    async fn test_ask_and_bad_input() {
        let mut shell = shell(false);
        assert_eq!(run(&mut shell, "ask ¿cómo empiezo?").await, "Anota cada gasto.");
        let out = run(&mut shell, "fly away").await;
        assert!(out.contains("unrecognized subcommand"), "{out}");
        assert_eq!(run(&mut shell, "   ").await, "");
    }

    #[tokio::test]
    async fn test_advisor_unavailable() {
        let mut shell = Shell::new(
            LocalBackend::new(),
            Err(anyhow::anyhow!("GEMINI_API_KEY is not set")),
            false,
        );
        let out = run(&mut shell, "ask hola").await;
        assert!(out.contains("GEMINI_API_KEY"), "{out}");
    }

    #[tokio::test]
    async fn test_denied_query_sets_error() {
        let backend = LocalBackend::new();
        let advisor: Arc<dyn Advisor> = Arc::new(ScriptedAdvisor::new());
        let mut shell = Shell::new(backend.clone(), Ok(advisor), false);
        run(&mut shell, "signup a@b.com secret1").await;
        backend.set_online(false);
        let state = wait_for(&shell, |s| s.error().is_some()).await;
        assert_eq!(state.error(), Some(crate::store::LOAD_ERROR));
        assert_eq!(run(&mut shell, "error").await, crate::store::LOAD_ERROR);
        assert_eq!(shell.report().permission_errors, 1);
        run(&mut shell, "clear-error").await;
        assert_eq!(run(&mut shell, "error").await, "No errors");
    }

    #[test]
    fn test_money() {
        assert_eq!(money(Decimal::new(123456, 2)), "$1,234.56");
        assert_eq!(money(Decimal::new(-2000, 2)), "-$20.00");
        assert_eq!(money(Decimal::ZERO), "$0.00");
    }
}
