use futures::StreamExt;
use log::{ info, warn };
use std::error::Error;
use std::io::Write as _;
use std::sync::Arc;
use tokio::io::{ AsyncBufReadExt, BufReader };
use uuid::Uuid;

use crate::engine::ChatEngine;

#[derive(Debug, PartialEq)]
pub enum ReplCommand {
    Exit,
    Switch(String),
    ShowExpert,
    Clear,
    Help,
    Message(String),
    Empty,
}

pub fn parse_command(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
        return ReplCommand::Exit;
    }

    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    match head.to_lowercase().as_str() {
        "/switch" => ReplCommand::Switch(rest.trim().to_string()),
        "/expert" => ReplCommand::ShowExpert,
        "/clear" => ReplCommand::Clear,
        "/help" => ReplCommand::Help,
        "/exit" | "/quit" => ReplCommand::Exit,
        _ => ReplCommand::Message(line.to_string()),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  /switch TYPE   switch expert (QNA, RAG, DEEPRESEARCH)");
    println!("  /expert        show the active expert");
    println!("  /clear         clear this conversation");
    println!("  exit | quit    leave");
}

async fn answer(engine: &ChatEngine, message: &str, conversation_id: &str, stream: bool) -> Result<(), String> {
    if !stream {
        let reply = engine.dispatch(message, conversation_id).await.map_err(|e| e.to_string())?;
        println!("{}", reply.content);
        return Ok(());
    }

    let mut fragments = engine.dispatch_stream(message, conversation_id).await.map_err(|e| e.to_string())?;
    while let Some(fragment) = fragments.next().await {
        let fragment = fragment.map_err(|e| e.to_string())?;
        print!("{}", fragment);
        let _ = std::io::stdout().flush();
    }
    println!();
    Ok(())
}

/// Interactive loop over stdin until `exit`, end of input or Ctrl-C.
pub async fn run_chat(
    engine: Arc<ChatEngine>,
    conversation_id: Option<String>,
    stream: bool
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let conversation_id = conversation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    info!("Interactive chat started (conversation {})", conversation_id);
    println!("─────────────────────────────────");
    println!(" expert-agent  [{}]  conversation {}", engine.current_expert(), conversation_id);
    println!(" /help for commands, exit to quit");
    println!("─────────────────────────────────");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("[{}] > ", engine.current_expert());
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        match parse_command(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Exit => {
                break;
            }
            ReplCommand::Help => print_help(),
            ReplCommand::ShowExpert => {
                let current = engine.current_expert();
                match engine.expert_info(current) {
                    Some(info) => println!("{}: {}", current, info.description),
                    None => println!("{}", current),
                }
            }
            ReplCommand::Switch(target) =>
                match engine.switch_expert(&target) {
                    Ok(outcome) => println!("Switched from {} to {}", outcome.previous, outcome.current),
                    Err(e) => println!("{}", e),
                }
            ReplCommand::Clear =>
                match engine.clear_history(&conversation_id).await {
                    Ok(()) => println!("Conversation cleared."),
                    Err(e) => println!("Could not clear conversation: {}", e),
                }
            ReplCommand::Message(message) => {
                if let Err(e) = answer(&engine, &message, &conversation_id, stream).await {
                    warn!("Turn failed: {}", e);
                    println!("\nError: {}", e);
                }
            }
        }
    }

    info!("Interactive chat finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_commands() {
        assert_eq!(parse_command("  "), ReplCommand::Empty);
        assert_eq!(parse_command("QUIT"), ReplCommand::Exit);
        assert_eq!(parse_command("/switch deep_research"), ReplCommand::Switch("deep_research".into()));
        assert_eq!(parse_command("/switch"), ReplCommand::Switch(String::new()));
        assert_eq!(parse_command("/expert"), ReplCommand::ShowExpert);
        assert_eq!(parse_command("/CLEAR"), ReplCommand::Clear);
    }

    #[test]
    fn everything_else_is_a_message() {
        assert_eq!(parse_command("exit strategy for startups?"), ReplCommand::Message("exit strategy for startups?".into()));
        assert_eq!(parse_command("/unknown thing"), ReplCommand::Message("/unknown thing".into()));
    }
}
