use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use lloom_core::{
    DispatchBatch, DispatchEngine, Role, SharedRegistry, SpaceEvent, SpaceId, SpaceRegistry,
    export_file_name, format_all, format_space,
};
use lloom_llm::{LlmProvider, Transport, create_provider, fetch_models_for_provider};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::command::{Command, HELP};
use crate::settings::{SettingsError, SettingsStore};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ShellError {
    #[snafu(display("there is no space {position}"))]
    UnknownSpace { position: usize },
    #[snafu(display("no models are loaded yet"))]
    NoModels,
    #[snafu(display("model `{model_id}` is not in the catalog, see /models"))]
    UnknownModel { model_id: String },
    #[snafu(display(
        "space {position} already has history or a pending reply; clear it before switching models"
    ))]
    ModelLocked { position: usize },
    #[snafu(display("space {position} is still waiting on a reply"))]
    Busy { position: usize },
    #[snafu(display("nothing to export"))]
    NothingToExport,
    #[snafu(display("failed to write export to {path:?} on `{stage}`: {source}"))]
    WriteExport {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to save settings on `{stage}`: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("failed to set up provider on `{stage}`: {source}"))]
    Provider {
        stage: &'static str,
        source: lloom_llm::TransportError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type ShellResult<T> = Result<T, ShellError>;

/// What the front end should do after a command ran.
pub enum Reply {
    Text(String),
    Dispatched(DispatchBatch),
    Quit,
}

/// Executes parsed commands against the registry and the dispatch engine.
///
/// Eligibility rules that the core deliberately leaves to its callers live
/// here: no model switch once a space has history, no new input for a space
/// that is still waiting on its model.
pub struct Shell {
    engine: DispatchEngine,
    provider: Arc<dyn LlmProvider>,
    settings: SettingsStore,
    export_dir: PathBuf,
}

impl Shell {
    pub fn new(
        engine: DispatchEngine,
        provider: Arc<dyn LlmProvider>,
        settings: SettingsStore,
    ) -> Self {
        Self {
            engine,
            provider,
            settings,
            export_dir: PathBuf::from("."),
        }
    }

    pub fn with_export_dir(mut self, export_dir: PathBuf) -> Self {
        self.export_dir = export_dir;
        self
    }

    fn registry(&self) -> &SharedRegistry {
        self.engine.registry()
    }

    /// Re-reads the model catalog and hands it to the registry. The first
    /// load also bootstraps the initial space.
    pub async fn refresh_models(&self) -> ShellResult<usize> {
        let catalog = fetch_models_for_provider(self.provider.as_ref())
            .await
            .context(ProviderSnafu {
                stage: "fetch-models",
            })?;
        if let Some(warning) = &catalog.warning {
            tracing::warn!(origin = ?catalog.origin, "{warning}");
        }
        tracing::info!(
            provider = self.provider.name(),
            origin = ?catalog.origin,
            models = catalog.models.len(),
            "loaded model catalog"
        );

        let count = catalog.models.len();
        self.registry().lock().set_models(catalog.models);
        Ok(count)
    }

    pub async fn execute(&self, command: Command) -> ShellResult<Reply> {
        match command {
            Command::Broadcast(text) => self.broadcast(&text),
            Command::New => self.create(),
            Command::Remove(position) => {
                let mut registry = self.registry().lock();
                let id = space_at(&registry, position)?;
                registry.remove(id);
                Ok(Reply::Text(format!("removed space {position}")))
            }
            Command::Clear(position) => {
                let mut registry = self.registry().lock();
                let id = space_at(&registry, position)?;
                registry.clear(id);
                Ok(Reply::Text(format!("cleared space {position}")))
            }
            Command::Model { position, model_id } => self.select_model(position, model_id),
            Command::System { position, text } => {
                let mut registry = self.registry().lock();
                let id = space_at(&registry, position)?;
                let reply = if text.trim().is_empty() {
                    format!("space {position} now uses the global system prompt")
                } else {
                    format!("set system prompt for space {position}")
                };
                registry.set_system_prompt(id, text);
                Ok(Reply::Text(reply))
            }
            Command::Global(text) => {
                let reply = if text.trim().is_empty() {
                    "cleared the global system prompt"
                } else {
                    "set the global system prompt"
                };
                self.settings
                    .set_global_system_prompt(text)
                    .context(SettingsSnafu {
                        stage: "save-global-system-prompt",
                    })?;
                Ok(Reply::Text(reply.to_string()))
            }
            Command::To { position, text } => self.send_to(position, &text),
            Command::Models => Ok(Reply::Text(self.list_models())),
            Command::Refresh => {
                let count = self.refresh_models().await?;
                Ok(Reply::Text(format!("loaded {count} model(s)")))
            }
            Command::Spaces => Ok(Reply::Text(self.list_spaces())),
            Command::Export { position, path } => self.export(position, path).await,
            Command::Help => Ok(Reply::Text(HELP.to_string())),
            Command::Quit => Ok(Reply::Quit),
        }
    }

    fn broadcast(&self, text: &str) -> ShellResult<Reply> {
        {
            let registry = self.registry().lock();
            if let Some(position) = registry
                .spaces()
                .iter()
                .position(|space| space.is_loading())
            {
                return BusySnafu {
                    position: position + 1,
                }
                .fail();
            }
        }

        let settings = self.settings.settings();
        let batch = self
            .engine
            .broadcast(text, settings.global_system_prompt());
        Ok(dispatched(batch))
    }

    fn send_to(&self, position: usize, text: &str) -> ShellResult<Reply> {
        let id = {
            let registry = self.registry().lock();
            let id = space_at(&registry, position)?;
            let loading = registry.get(id).is_some_and(|space| space.is_loading());
            ensure!(!loading, BusySnafu { position });
            id
        };

        let settings = self.settings.settings();
        let batch = self
            .engine
            .dispatch_to_one(id, text, settings.global_system_prompt());
        Ok(dispatched(batch))
    }

    fn create(&self) -> ShellResult<Reply> {
        let mut registry = self.registry().lock();
        let id = registry.create().context(NoModelsSnafu)?;
        let position = registry.position(id).map_or(registry.len(), |index| index + 1);
        Ok(Reply::Text(format!("created space {position}")))
    }

    fn select_model(&self, position: usize, model_id: String) -> ShellResult<Reply> {
        let mut registry = self.registry().lock();
        let id = space_at(&registry, position)?;
        let locked = registry
            .get(id)
            .is_some_and(|space| space.is_loading() || space.has_history());
        ensure!(!locked, ModelLockedSnafu { position });
        let name = registry
            .model_name(&model_id)
            .map(str::to_string)
            .context(UnknownModelSnafu {
                model_id: model_id.clone(),
            })?;
        registry.set_model(id, model_id);
        Ok(Reply::Text(format!("space {position} now talks to {name}")))
    }

    fn list_spaces(&self) -> String {
        render_spaces(&self.registry().lock())
    }

    fn list_models(&self) -> String {
        let registry = self.registry().lock();
        if registry.models().is_empty() {
            return "no models loaded".to_string();
        }

        registry
            .models()
            .iter()
            .map(|model| {
                if model.context_length > 0 {
                    format!("  {}  {} ({} tokens)", model.id, model.name, model.context_length)
                } else {
                    format!("  {}  {}", model.id, model.name)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn export(&self, position: Option<usize>, path: Option<PathBuf>) -> ShellResult<Reply> {
        let content = {
            let registry = self.registry().lock();
            match position {
                Some(position) => {
                    let id = space_at(&registry, position)?;
                    registry
                        .get(id)
                        .filter(|space| space.has_history())
                        .map(format_space)
                }
                None => format_all(registry.spaces(), registry.models()),
            }
        };
        let content = content.context(NothingToExportSnafu)?;

        let path = path.unwrap_or_else(|| self.export_dir.join(export_file_name(Local::now())));
        tokio::fs::write(&path, content)
            .await
            .context(WriteExportSnafu {
                stage: "write-export-file",
                path: path.clone(),
            })?;

        tracing::info!(path = ?path, "exported chat history");
        Ok(Reply::Text(format!("exported to {}", path.display())))
    }
}

/// Runs the interactive loop until `/quit` or end of input.
pub async fn run(settings: SettingsStore) -> ShellResult<()> {
    let provider = create_provider(settings.settings().to_provider_config()).context(ProviderSnafu {
        stage: "create-provider",
    })?;
    let registry = SpaceRegistry::new().into_shared();
    let transport: Arc<dyn Transport> = provider.clone();
    let engine = DispatchEngine::new(registry.clone(), transport);
    let shell = Shell::new(engine, provider, settings);
    let printer = spawn_settlement_printer(registry);

    let count = shell.refresh_models().await?;
    println!("lloom: {count} model(s) loaded, /help for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context(ReadInputSnafu {
        stage: "read-stdin-line",
    })? {
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(error) => {
                println!("{error}");
                continue;
            }
        };

        match shell.execute(command).await {
            Ok(Reply::Quit) => break,
            Ok(Reply::Text(text)) => println!("{text}"),
            Ok(Reply::Dispatched(batch)) => println!("sent to {} space(s)", batch.len()),
            Err(error) => println!("{error}"),
        }
    }

    printer.abort();
    Ok(())
}

fn dispatched(batch: DispatchBatch) -> Reply {
    if batch.is_empty() {
        Reply::Text("nothing sent".to_string())
    } else {
        Reply::Dispatched(batch)
    }
}

fn space_at(registry: &SpaceRegistry, position: usize) -> ShellResult<SpaceId> {
    position
        .checked_sub(1)
        .and_then(|index| registry.id_at(index))
        .context(UnknownSpaceSnafu { position })
}

pub fn render_spaces(registry: &SpaceRegistry) -> String {
    if registry.is_empty() {
        return "no spaces, use /new".to_string();
    }

    registry
        .spaces()
        .iter()
        .enumerate()
        .map(|(index, space)| {
            let model = registry
                .model_name(space.selected_model())
                .unwrap_or(space.selected_model());
            let mut line = format!(
                "[{}] {} ({} messages)",
                index + 1,
                model,
                space.messages().len()
            );
            if !space.system_prompt().trim().is_empty() {
                line.push_str(" +system");
            }
            if space.is_loading() {
                line.push_str(" waiting");
            }
            if let Some(error) = space.error() {
                line.push_str(&format!(" error: {error}"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// What a settled space looks like to the reader: its reply, or its error.
pub fn render_settlement(registry: &SpaceRegistry, id: SpaceId) -> Option<String> {
    let position = registry.position(id)? + 1;
    let space = registry.get(id)?;

    if let Some(error) = space.error() {
        return Some(format!("[{position}] error: {error}"));
    }

    let message = space.last_message().filter(|message| message.role == Role::Assistant)?;
    let model = message.model.as_deref().unwrap_or(space.selected_model());
    Some(format!("[{position}] {model}:\n{}\n", message.content))
}

/// Prints each settlement as it lands, independent of the input loop.
pub fn spawn_settlement_printer(registry: SharedRegistry) -> JoinHandle<()> {
    let mut events = registry.lock().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SpaceEvent::Settled(id)) => {
                    let rendered = render_settlement(&registry.lock(), id);
                    if let Some(text) = rendered {
                        println!("{text}");
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "settlement printer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use lloom_llm::{MockTransport, static_models};

    use super::*;
    use crate::settings::Settings;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lloom-shell-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    async fn shell(name: &str) -> (Shell, PathBuf) {
        let dir = scratch_dir(name);
        let mock = Arc::new(MockTransport::instant(static_models()));
        let engine = DispatchEngine::new(SpaceRegistry::new().into_shared(), mock.clone());
        let settings = SettingsStore::with_settings(dir.join("settings.json"), Settings::default());
        let shell = Shell::new(engine, mock, settings).with_export_dir(dir.clone());
        shell.refresh_models().await.unwrap();
        (shell, dir)
    }

    async fn text(shell: &Shell, line: &str) -> String {
        let command = Command::parse(line).unwrap().unwrap();
        match shell.execute(command).await.unwrap() {
            Reply::Text(text) => text,
            Reply::Dispatched(_) => panic!("expected text for {line}"),
            Reply::Quit => panic!("unexpected quit for {line}"),
        }
    }

    async fn send(shell: &Shell, line: &str) -> DispatchBatch {
        let command = Command::parse(line).unwrap().unwrap();
        match shell.execute(command).await.unwrap() {
            Reply::Dispatched(batch) => batch,
            _ => panic!("expected a dispatch for {line}"),
        }
    }

    async fn fails(shell: &Shell, line: &str) -> ShellError {
        let command = Command::parse(line).unwrap().unwrap();
        match shell.execute(command).await {
            Err(error) => error,
            Ok(_) => panic!("expected {line} to fail"),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_space() {
        let (shell, dir) = shell("broadcast").await;
        text(&shell, "/new").await;

        let reports = send(&shell, "hello").await.join().await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|report| report.outcome.is_success()));

        let registry = shell.registry().lock();
        for space in registry.spaces() {
            assert_eq!(space.messages().len(), 2);
        }
        drop(registry);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn input_is_refused_while_a_target_is_waiting() {
        let (shell, dir) = shell("busy").await;
        let batch = send(&shell, "first").await;

        assert!(matches!(
            fails(&shell, "second").await,
            ShellError::Busy { position: 1 }
        ));
        assert!(matches!(
            fails(&shell, "/to 1 second").await,
            ShellError::Busy { position: 1 }
        ));

        batch.join().await;
        send(&shell, "second").await.join().await;
        assert_eq!(shell.registry().lock().spaces()[0].messages().len(), 4);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn model_switch_needs_an_empty_space() {
        let (shell, dir) = shell("model").await;

        assert!(matches!(
            fails(&shell, "/model 1 nobody/none").await,
            ShellError::UnknownModel { .. }
        ));
        assert_eq!(
            text(&shell, "/model 1 openai/gpt-4o").await,
            "space 1 now talks to GPT-4o"
        );

        send(&shell, "hi").await.join().await;
        assert!(matches!(
            fails(&shell, "/model 1 mistralai/mistral-large").await,
            ShellError::ModelLocked { position: 1 }
        ));

        text(&shell, "/clear 1").await;
        text(&shell, "/model 1 mistralai/mistral-large").await;
        assert_eq!(
            shell.registry().lock().spaces()[0].selected_model(),
            "mistralai/mistral-large"
        );
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn positions_are_one_based() {
        let (shell, dir) = shell("positions").await;

        assert!(matches!(
            fails(&shell, "/rm 2").await,
            ShellError::UnknownSpace { position: 2 }
        ));
        assert_eq!(text(&shell, "/new").await, "created space 2");
        assert_eq!(text(&shell, "/rm 1").await, "removed space 1");
        assert_eq!(shell.registry().lock().len(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn to_only_touches_one_space() {
        let (shell, dir) = shell("to").await;
        text(&shell, "/new").await;
        text(&shell, "/system 2 You are terse.").await;

        let reports = send(&shell, "/to 2 ping").await.join().await;
        assert_eq!(reports.len(), 1);

        let registry = shell.registry().lock();
        assert!(!registry.spaces()[0].has_history());
        assert_eq!(registry.spaces()[1].messages().len(), 2);
        assert_eq!(registry.spaces()[1].system_prompt(), "You are terse.");
        drop(registry);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn export_writes_markdown_or_reports_nothing() {
        let (shell, dir) = shell("export").await;

        assert!(matches!(
            fails(&shell, "/export").await,
            ShellError::NothingToExport
        ));

        send(&shell, "tell me a joke").await.join().await;
        let target = dir.join("joke.md");
        let reply = text(&shell, &format!("/export 1 {}", target.display())).await;
        assert!(reply.starts_with("exported to"));

        let written = std::fs::read_to_string(&target).unwrap();
        assert!(written.starts_with("### User"));
        assert!(written.contains("tell me a joke"));

        let reply = text(&shell, "/export").await;
        let default_path = reply.trim_start_matches("exported to ").to_string();
        let written = std::fs::read_to_string(default_path).unwrap();
        assert!(written.starts_with("## "));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn settlement_renders_reply_or_error() {
        let (shell, dir) = shell("render").await;
        let id = shell.registry().lock().id_at(0).unwrap();
        assert_eq!(render_settlement(&shell.registry().lock(), id), None);

        send(&shell, "hello").await.join().await;
        let rendered = render_settlement(&shell.registry().lock(), id).unwrap();
        assert!(rendered.starts_with("[1] Claude 3 Opus:\n"));
        assert!(rendered.contains("Answering about hello."));

        let listing = render_spaces(&shell.registry().lock());
        assert_eq!(listing, "[1] Claude 3 Opus (2 messages)");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn help_and_quit() {
        let (shell, dir) = shell("help").await;
        assert_eq!(text(&shell, "/help").await, HELP);
        assert!(matches!(
            shell.execute(Command::Quit).await.unwrap(),
            Reply::Quit
        ));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn refresh_keeps_existing_spaces() {
        let (shell, dir) = shell("refresh").await;
        assert_eq!(shell.registry().lock().len(), 1);
        text(&shell, "/new").await;

        assert_eq!(text(&shell, "/refresh").await, "loaded 6 model(s)");
        let registry = shell.registry().lock();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.models(), static_models().as_slice());
        drop(registry);
        let _ = std::fs::remove_dir_all(dir);
    }
}
