//! Client - command-line front end for a running `poker-server`

mod identity;
mod remote;

pub use identity::IdentityStore;
pub use remote::RemoteBackend;

use crate::config::Config;
use crate::model::{Effort, Participant};
use crate::sync::{SessionBackend, SessionConnection, ViewModel, Wake};
use anyhow::{anyhow, Context, Result};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;

/// What woke the interactive loop
enum Input {
    Line(Option<String>),
    Wake(crate::error::Result<Wake>),
    Interrupt,
}

/// Start a new session, spawning the server if it is not running
pub async fn create_session(config: &Config, server: &str, username: &str) -> Result<()> {
    let backend = connect_or_spawn(config, server).await?;
    let (session, participant) = backend.create_session(username).await?;

    identities(config).save(&session.session_id, &participant)?;
    tracing::info!("Created session {}", session.session_id);

    println!("Created session {}", session.session_id);
    println!("Share it with: poker join {} --name <you>", session.session_id);
    Ok(())
}

/// Join an existing session under a new identity
pub async fn join_session(
    config: &Config,
    server: &str,
    session_id: &str,
    username: &str,
) -> Result<()> {
    let backend = connect(config, server).await?;
    let participant = backend.join_session(session_id, username).await?;

    identities(config).save(session_id, &participant)?;
    println!("Joined {} as {}", session_id, participant.username);
    Ok(())
}

/// Cast the local participant's vote
pub async fn cast_vote(config: &Config, server: &str, session_id: &str, effort: Effort) -> Result<()> {
    let mut conn = open(config, server, session_id).await?;
    let result = conn.submit_vote(effort).await;
    finish(conn, result).await
}

/// Reveal or hide everyone's votes
pub async fn toggle_votes(config: &Config, server: &str, session_id: &str) -> Result<()> {
    let mut conn = open(config, server, session_id).await?;
    let result = conn.toggle_visibility().await;
    finish(conn, result).await
}

/// Reset every vote and hide them
pub async fn clear_votes(config: &Config, server: &str, session_id: &str) -> Result<()> {
    let mut conn = open(config, server, session_id).await?;
    let result = conn.clear_votes().await;
    finish(conn, result).await
}

/// Print the current state of a session once
pub async fn show_session(config: &Config, server: &str, session_id: &str, json: bool) -> Result<()> {
    let conn = open(config, server, session_id).await?;
    let view = conn.view();
    conn.teardown().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print!("{}", render(&view));
    }
    Ok(())
}

/// Follow a session live, reading cards and commands from stdin
///
/// A line holding a card casts it; `t` toggles visibility, `c` clears,
/// `d` dismisses the current notice and `q` quits.
pub async fn watch_session(config: &Config, server: &str, session_id: &str) -> Result<()> {
    let mut conn = open(config, server, session_id).await?;
    let mut views = conn.watch();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print!("{}", render(&views.borrow_and_update()));
    println!("cards: {}", card_list());

    let outcome = loop {
        // Only cancel-safe futures race here; processing runs outside
        let input = tokio::select! {
            line = lines.next_line() => Input::Line(line.unwrap_or(None)),
            wake = conn.wait() => Input::Wake(wake),
            _ = tokio::signal::ctrl_c() => Input::Interrupt,
        };

        match input {
            Input::Line(None) | Input::Interrupt => break Ok(()),
            Input::Line(Some(line)) => match line.trim() {
                "" => {}
                "q" | "quit" => break Ok(()),
                "t" | "toggle" => report(conn.toggle_visibility().await),
                "c" | "clear" => report(conn.clear_votes().await),
                "d" | "dismiss" => conn.dismiss_notice(),
                card => match card.parse::<Effort>() {
                    Ok(effort) => report(conn.submit_vote(effort).await),
                    Err(e) => eprintln!("{}", e),
                },
            },
            Input::Wake(Ok(wake)) => conn.handle(wake).await,
            Input::Wake(Err(e)) => break Err(anyhow!(e)),
        }

        if views.has_changed().unwrap_or(false) {
            print!("{}", render(&views.borrow_and_update()));
        }
    };

    conn.teardown().await?;
    outcome
}

/// Text rendering of a view, host first
pub fn render(view: &ViewModel) -> String {
    let mut out = format!(
        "Session {} (votes {}){}\n",
        view.session_id,
        if view.votes_visible { "revealed" } else { "hidden" },
        if view.is_optimistic() { " [pending]" } else { "" }
    );

    let host = view.hostname.as_deref();
    let mut names: Vec<&String> = view.votes_by_username.keys().collect();
    names.sort_by_key(|name| Some(name.as_str()) != host);

    for name in names {
        let effort = view.votes_by_username.get(name).copied().flatten();
        let shown = match (effort, view.votes_visible) {
            (Some(effort), true) => effort.to_string(),
            (Some(_), false) => "voted".to_string(),
            (None, _) => "-".to_string(),
        };
        let mut tags = Vec::new();
        if Some(name.as_str()) == host {
            tags.push("host".to_string());
        }
        if Some(name) == view.local_username.as_ref() {
            match effort {
                Some(effort) => tags.push(format!("you: {}", effort)),
                None => tags.push("you".to_string()),
            }
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!(" ({})", tags.join(", "))
        };
        out.push_str(&format!("  {}{}: {}\n", name, tags, shown));
    }

    out.push_str(&format!(
        "{}/{} voted\n",
        view.voted_count(),
        view.votes_by_username.len()
    ));
    if let Some(notice) = &view.notice {
        out.push_str(&format!("! {}\n", notice));
    }
    out
}

fn card_list() -> String {
    Effort::ALL
        .iter()
        .map(|e| e.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn report(result: crate::error::Result<ViewModel>) {
    if let Err(e) = result {
        eprintln!("error: {}", e);
    }
}

/// Tear the connection down and surface the mutation's outcome
async fn finish(
    conn: SessionConnection,
    result: crate::error::Result<ViewModel>,
) -> Result<()> {
    conn.teardown().await?;
    let view = result?;
    print!("{}", render(&view));
    Ok(())
}

fn identities(config: &Config) -> IdentityStore {
    IdentityStore::in_dir(&config.data_dir())
}

fn identity(config: &Config, session_id: &str) -> Result<Participant> {
    identities(config).get(session_id)?.ok_or_else(|| {
        anyhow!(
            "Not joined to session '{}'; run `poker join {} --name <you>` first",
            session_id,
            session_id
        )
    })
}

async fn open(config: &Config, server: &str, session_id: &str) -> Result<SessionConnection> {
    let participant = identity(config, session_id)?;
    let backend: Arc<dyn SessionBackend> = Arc::new(connect(config, server).await?);
    let conn = SessionConnection::init(backend, session_id, participant, &config.sync.settings())
        .await
        .with_context(|| format!("Failed to open session '{}'", session_id))?;
    Ok(conn)
}

async fn connect(config: &Config, server: &str) -> Result<RemoteBackend> {
    let socket_path = config.socket_path(server);
    if !socket_path.exists() {
        return Err(anyhow!(
            "Server '{}' is not running (no socket at {})",
            server,
            socket_path.display()
        ));
    }
    RemoteBackend::connect(&socket_path).await
}

async fn connect_or_spawn(config: &Config, server: &str) -> Result<RemoteBackend> {
    let socket_path = config.socket_path(server);
    if let Ok(backend) = RemoteBackend::connect(&socket_path).await {
        return Ok(backend);
    }

    println!("poker: spawning server '{}'...", server);
    let exe = std::env::current_exe()?
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."))
        .join("poker-server");

    let server_bin = if exe.exists() {
        exe.to_string_lossy().to_string()
    } else {
        "poker-server".to_string()
    };

    Command::new(server_bin)
        .arg("--name")
        .arg(server)
        .arg("--socket")
        .arg(&socket_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to spawn poker-server")?;

    // Wait for socket to appear
    let mut attempts = 0;
    loop {
        sleep(Duration::from_millis(100)).await;
        if let Ok(backend) = RemoteBackend::connect(&socket_path).await {
            return Ok(backend);
        }
        attempts += 1;
        if attempts > 20 {
            return Err(anyhow!("Timed out waiting for server to start"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncState;
    use std::collections::BTreeMap;

    fn view() -> ViewModel {
        let mut votes = BTreeMap::new();
        votes.insert("ada".to_string(), Some(Effort::Five));
        votes.insert("zed".to_string(), None);
        votes.insert("bob".to_string(), Some(Effort::Three));
        ViewModel {
            session_id: "calm-otter-3".to_string(),
            state: SyncState::Synced,
            votes_by_username: votes,
            hostname: Some("zed".to_string()),
            local_username: Some("ada".to_string()),
            is_host: false,
            votes_visible: false,
            optimistic_effort: None,
            input_epoch: 0,
            notice: None,
        }
    }

    #[test]
    fn test_render_hides_votes_and_lists_host_first() {
        let text = render(&view());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Session calm-otter-3 (votes hidden)");
        assert_eq!(lines[1], "  zed (host): -");
        assert_eq!(lines[2], "  ada (you: 5): voted");
        assert_eq!(lines[3], "  bob: voted");
        assert_eq!(lines[4], "2/3 voted");
    }

    #[test]
    fn test_render_revealed_with_notice() {
        let mut view = view();
        view.votes_visible = true;
        view.state = SyncState::Optimistic;
        view.notice = Some("store failure: offline".to_string());
        let text = render(&view);
        assert!(text.starts_with("Session calm-otter-3 (votes revealed) [pending]"));
        assert!(text.contains("  bob: 3\n"));
        assert!(text.ends_with("! store failure: offline\n"));
    }
}
