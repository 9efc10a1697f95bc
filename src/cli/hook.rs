//! Hook command implementation

use anyhow::{Context, Result};
use std::io::{IsTerminal, Read};
use std::sync::Arc;
use tracing::debug;

use crate::hooks::{run_hook, HookContext, HookPayload};
use crate::reader::ReaderRegistry;
use crate::Config;

/// Values given as flags; they win over the stdin payload
#[derive(Debug, Default)]
pub struct HookArgs {
    pub event: Option<String>,
    pub conversation_id: Option<String>,
    pub file: Option<String>,
    pub workspace_root: Option<String>,
    pub agent: Option<String>,
    pub commit: Option<String>,
}

impl HookArgs {
    fn payload(&self) -> HookPayload {
        HookPayload {
            event: None,
            conversation_id: self.conversation_id.clone(),
            file_path: self.file.clone(),
            workspace_root: self.workspace_root.clone(),
            agent: self.agent.clone(),
            commit: self.commit.clone(),
            title: None,
            summary: None,
        }
    }
}

fn read_stdin_payload() -> HookPayload {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return HookPayload::default();
    }
    let mut raw = String::new();
    if let Err(e) = stdin.lock().read_to_string(&mut raw) {
        debug!("could not read hook payload from stdin: {e}");
        return HookPayload::default();
    }
    HookPayload::from_json(&raw)
}

pub fn run(config: Config, args: HookArgs) -> Result<()> {
    let payload = args.payload().or(read_stdin_payload());
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let registry = Arc::new(ReaderRegistry::new(&config));
    let ctx = HookContext::new(config, registry, cwd);

    let outcome = run_hook(&ctx, args.event.as_deref(), payload)?;
    println!("{}", outcome);
    Ok(())
}
