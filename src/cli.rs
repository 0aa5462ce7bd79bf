use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sefile", version)]
#[command(about = "Manage files encrypted by a security token.")]
#[command(arg_required_else_help = true)]
#[command(after_help = "Examples:
  sefile list --pe /media/token -d ./vault
  sefile wrcff --pe /media/token -i report.pdf -c ./vault/report.pdf
  sefile wrcfs -c ./vault/note.txt -i \"meet at noon\"
  sefile wrffc -c ./vault/report.pdf -o report.pdf --force
  echo 1234 | sefile wrsfc --password-stdin -c ./vault/note.txt")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to <config dir>/sefile/config.toml).
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(long, global = true)]
    pub verbose: bool,
}

/// Device and credential options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct Connect {
    /// Device identifier (mount point, or drive letter on Windows).
    #[arg(long = "peripheral", visible_alias = "pe", value_name = "ID")]
    pub peripheral: Option<String>,

    /// Device password. Prompted for when omitted.
    #[arg(long = "password", visible_alias = "pa", conflicts_with = "password_stdin")]
    pub password: Option<String>,

    /// Read the device password as the first line of stdin.
    #[arg(long)]
    pub password_stdin: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the encrypted files in a directory.
    #[command(visible_alias = "ls")]
    List {
        #[command(flatten)]
        connect: Connect,
        #[arg(short = 'd', long, default_value = ".")]
        directory: String,
    },
    /// Encrypt a local file into a cipher file.
    #[command(name = "write-cipher-from-file", visible_alias = "wrcff")]
    WriteCipherFromFile {
        #[command(flatten)]
        connect: Connect,
        #[arg(short = 'i', long)]
        input: PathBuf,
        #[arg(short = 'c', long)]
        cipher: String,
    },
    /// Encrypt a string into a cipher file. Without -i the string is read
    /// as one line from stdin.
    #[command(name = "write-cipher-from-string", visible_alias = "wrcfs")]
    WriteCipherFromString {
        #[command(flatten)]
        connect: Connect,
        #[arg(short = 'i', long)]
        input: Option<String>,
        #[arg(short = 'c', long)]
        cipher: String,
    },
    /// Decrypt a cipher file into a local file.
    #[command(name = "write-file-from-cipher", visible_alias = "wrffc")]
    WriteFileFromCipher {
        #[command(flatten)]
        connect: Connect,
        #[arg(short = 'c', long)]
        cipher: String,
        #[arg(short = 'o', long)]
        output: PathBuf,
        /// Replace the output file if it exists.
        #[arg(long)]
        force: bool,
    },
    /// Decrypt a cipher file and print it.
    #[command(name = "write-string-from-cipher", visible_alias = "wrsfc")]
    WriteStringFromCipher {
        #[command(flatten)]
        connect: Connect,
        #[arg(short = 'c', long)]
        cipher: String,
    },
}
