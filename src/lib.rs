pub mod brain;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod experts;
pub mod history;
pub mod llm;
pub mod models;
pub mod rag;
pub mod server;
pub mod tools;

#[cfg(test)]
mod testing;

use cli::{ Args, Command };
use engine::ChatEngine;
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    args.log_configuration();

    let engine = Arc::new(ChatEngine::from_args(&args).await?);
    match args.command() {
        Command::Serve => {
            let addr = args.server_addr.clone();
            info!("Starting server on: {}", addr);
            Server::new(addr, engine, args).run().await?;
        }
        Command::Chat { conversation_id, no_stream } => {
            cli::repl::run_chat(engine, conversation_id, !no_stream).await?;
        }
    }

    Ok(())
}
