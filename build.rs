//! Build script generating manual pages from the CLI definition.

use std::{fs, path::PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli.rs"]
mod cli;

fn render(cmd: clap::Command) -> Result<Vec<u8>, std::io::Error> {
    let mut buf = Vec::new();
    Man::new(cmd).render(&mut buf)?;
    Ok(buf)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");

    let out_dir = PathBuf::from("target/generated-man");
    fs::create_dir_all(&out_dir)?;

    let cmd = cli::Cli::command();
    for sub in cmd.get_subcommands() {
        let name = format!("fragcast-{}", sub.get_name());
        let page = render(sub.clone().name(name.clone()))?;
        fs::write(out_dir.join(format!("{name}.1")), page)?;
    }
    fs::write(out_dir.join("fragcast.1"), render(cmd)?)?;

    Ok(())
}
