use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::commands::load_container;

/// Show the container state
#[derive(Parser, Debug)]
pub struct State {
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub container_id: String,
}

pub fn state(args: State, root_path: PathBuf) -> Result<()> {
    let container = load_container(root_path, &args.container_id)?;
    println!("{}", serde_json::to_string_pretty(&container.state.oci_state())?);
    Ok(())
}
