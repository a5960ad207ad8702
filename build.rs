// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: destination bucket
fn bucket_arg() -> Arg {
    Arg::new("bucket")
        .short('b')
        .long("bucket")
        .value_name("BUCKET")
        .help("Bucket, optionally with a key prefix (\"bucket/prefix\")")
}

/// Common argument: replace existing objects
fn replace_arg() -> Arg {
    Arg::new("replace")
        .long("replace")
        .action(ArgAction::SetTrue)
        .help("Replace objects in S3 that already exist")
}

/// Common argument: include components
fn components_arg() -> Arg {
    Arg::new("components")
        .long("components")
        .action(ArgAction::SetTrue)
        .help("Also process the components (children) of each document")
}

fn build_cli() -> Command {
    Command::new("refstash")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Refstash Contributors")
        .about("Convert repository master images to lossless JPEG 2000 and archive them in S3")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .global(true)
                .help("Config file (default: ~/.config/refstash/config.toml)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log at debug level unless RUST_LOG says otherwise"),
        )
        .subcommand(
            Command::new("stash")
                .about("Convert one document and stash it in S3")
                .arg(Arg::new("path").required(true).help("Repository document path"))
                .arg(bucket_arg())
                .arg(replace_arg()),
        )
        .subcommand(
            Command::new("collection")
                .about("Convert and stash every document in a collection")
                .arg(Arg::new("path").required(true).help("Repository path of the collection"))
                .arg(bucket_arg())
                .arg(replace_arg())
                .arg(components_arg())
                .arg(
                    Arg::new("workers")
                        .short('w')
                        .long("workers")
                        .help("Documents processed concurrently"),
                )
                .arg(Arg::new("report_dir").long("report-dir").help("Directory for the JSON report"))
                .arg(Arg::new("log_dir").long("log-dir").help("Directory for the collection log file")),
        )
        .subcommand(
            Command::new("check")
                .about("List collection documents that have no image in S3 yet")
                .arg(Arg::new("path").required(true).help("Repository path of the collection"))
                .arg(bucket_arg())
                .arg(components_arg()),
        )
        .subcommand(
            Command::new("download")
                .about("Download a document's master file without converting it")
                .arg(Arg::new("path").required(true).help("Repository document path"))
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("Directory to write the file to (default: current directory)"),
                ),
        )
        .subcommand(
            Command::new("convert")
                .about("Convert a local file to JPEG 2000 without touching S3")
                .arg(Arg::new("input").required(true).help("Input image"))
                .arg(Arg::new("output").required(true).help("Output JPEG 2000 file"))
                .arg(
                    Arg::new("mimetype")
                        .short('m')
                        .long("mimetype")
                        .help("Mimetype of the input (detected from its content if omitted)"),
                ),
        )
        .subcommand(
            Command::new("summary")
                .about("Print the summary of a saved report")
                .arg(Arg::new("report").required(true).help("Report file written by `collection`")),
        )
        .subcommand(
            Command::new("bucket-stats")
                .about("Count objects and bytes in the destination bucket")
                .arg(bucket_arg()),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell", "elvish"])
                        .help("Shell to generate completions for"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

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

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("refstash.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
