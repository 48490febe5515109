use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use hf_hub::api::tokio::Api;
use lumen_core::{load_model, OutputWriter, Predictor};
use tracing_subscriber::EnvFilter;

mod args;
mod generate;
mod interrupt;

use args::Args;
use generate::Session;
use interrupt::{finish_unless_interrupted, next_ctrl_c};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let prompts = args.prompts()?;
    if prompts.is_empty() {
        println!("Please provide a prompt or a --prompt-file.");
        return Ok(());
    }

    let model = load_model(&args.model, Api::new()?, args.device_map()).await?;
    let session = Session::new(
        Predictor::new(model),
        OutputWriter::new(&args.output_dir, args.naming),
        args.settings(),
        prompts,
    );

    if !args.continuous {
        tokio::task::spawn_blocking(move || session.run_once()).await??;
        return Ok(());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut worker = tokio::task::spawn_blocking({
        let stop = stop.clone();
        move || session.run_continuous(&stop)
    });

    tokio::select! {
        result = &mut worker => {
            result??;
        }
        _ = next_ctrl_c() => {
            stop.store(true, Ordering::SeqCst);
            println!("\nFinishing the current image, press Ctrl-C again to quit now...");
            match finish_unless_interrupted(worker, next_ctrl_c()).await {
                Some(result) => {
                    result?;
                    println!("Stopped by user.");
                }
                None => {
                    println!("Interrupted.");
                    std::process::exit(130);
                }
            }
        }
    }

    Ok(())
}
