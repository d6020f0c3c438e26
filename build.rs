// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: application id from the configuration
fn app_arg() -> Arg {
    Arg::new("app")
        .required(true)
        .help("Application id from the configuration")
}

/// Common argument: channel
fn channel_arg() -> Arg {
    Arg::new("channel")
        .short('c')
        .long("channel")
        .value_name("CHANNEL")
}

fn build_cli() -> Command {
    Command::new("relpack")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Relpack Contributors")
        .about("Full and delta release packaging with channel promotion and leased publication")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .default_value("relpack.toml")
                .global(true)
                .help("Configuration file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::SetTrue)
                .global(true)
                .help("Debug logging (RUST_LOG overrides)"),
        )
        .subcommand(
            Command::new("pack")
                .about("Build the full (and delta) package of a version and publish it")
                .arg(app_arg())
                .arg(Arg::new("version").required(true).help("Version being packed (semver)"))
                .arg(
                    Arg::new("artifacts")
                        .short('a')
                        .long("artifacts")
                        .required(true)
                        .help("Directory of built application artifacts"),
                )
                .arg(
                    Arg::new("assets")
                        .long("assets")
                        .help("Support files packed under the assets root"),
                )
                .arg(
                    Arg::new("rebase")
                        .long("rebase")
                        .action(clap::ArgAction::SetTrue)
                        .help("Cut a new full baseline instead of a delta"),
                )
                .arg(Arg::new("notes").long("notes").help("Release notes stored with the release"))
                .arg(
                    Arg::new("engine")
                        .long("engine")
                        .default_value("zstd")
                        .value_parser(["zstd", "block"])
                        .help("Delta engine"),
                ),
        )
        .subcommand(
            Command::new("promote")
                .about("Promote a version to the next channel of the pipeline")
                .arg(app_arg())
                .arg(channel_arg().required(true).help("Channel the version is promoted out of"))
                .arg(
                    Arg::new("version")
                        .long("version")
                        .help("Version to promote (default: most recent)"),
                )
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(clap::ArgAction::SetTrue)
                        .help("Promote to every remaining channel"),
                ),
        )
        .subcommand(
            Command::new("demote")
                .about("Remove releases from the catalog (rollback)")
                .arg(app_arg())
                .arg(Arg::new("rid").long("rid").help("Only releases of this runtime identifier"))
                .arg(channel_arg().help("Only releases promoted into this channel"))
                .arg(
                    Arg::new("from_version")
                        .long("from-version")
                        .help("Remove this version and every later one"),
                )
                .arg(
                    Arg::new("dry_run")
                        .long("dry-run")
                        .action(clap::ArgAction::SetTrue)
                        .help("Show what would be removed without changing the catalog"),
                ),
        )
        .subcommand(
            Command::new("restore")
                .about("Download and verify every package of a channel")
                .arg(app_arg())
                .arg(channel_arg().required(true).help("Channel to restore"))
                .arg(
                    Arg::new("dest")
                        .short('d')
                        .long("dest")
                        .required(true)
                        .help("Destination directory"),
                )
                .arg(
                    Arg::new("no_rebuild")
                        .long("no-rebuild")
                        .action(clap::ArgAction::SetTrue)
                        .help("Fail instead of rebuilding full packages missing from the feed"),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("Show the release catalog of an application")
                .arg(app_arg())
                .arg(channel_arg().help("Only releases in this channel")),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory - use CARGO_MANIFEST_DIR which is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("relpack.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
        return;
    }

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
