use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Client-side emission graph synchronization
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Calculation service base URL (overrides api_base_url from emigraph.json)
    #[arg(short = 'a', long = "api", value_name = "URL")]
    pub api: Option<String>,

    /// Active installation whose canvas is loaded
    #[arg(short = 'i', long = "installation", value_name = "ID")]
    pub installation: Option<i64>,

    /// Enable logging to file (default: emigraph.log in the data dir)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Print the canvas of the active installation (refreshes flagged nodes first)
    Show,

    /// Fetch the emission of a process (repairs missing or drifted values)
    ProcessEmission {
        #[arg(value_name = "PROCESS_ID")]
        id: i64,
    },

    /// Fetch the live emission preview of a product
    ProductEmission {
        #[arg(value_name = "PRODUCT_ID")]
        id: i64,
    },

    /// Recalculate the whole graph, or start from one process
    Recalc {
        /// Scoped recalculation from this process, then full propagation
        #[arg(short = 'p', long = "process", value_name = "PROCESS_ID")]
        process: Option<i64>,
    },

    /// Place a process on the canvas of the active installation
    AddProcess {
        #[arg(value_name = "PROCESS_ID")]
        id: i64,
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Place a product on the canvas of the active installation
    AddProduct {
        #[arg(value_name = "PRODUCT_ID")]
        id: i64,
        #[arg(value_name = "NAME")]
        name: String,
        /// Customs tariff code shown under the name
        #[arg(long = "hs-code", value_name = "CODE")]
        hs_code: Option<String>,
    },

    /// Connect two canvas nodes (kind is derived from the node kinds)
    Link {
        #[arg(value_name = "SOURCE_NODE")]
        source: String,
        #[arg(value_name = "TARGET_NODE")]
        target: String,
        #[arg(long = "source-handle", value_name = "HANDLE")]
        source_handle: Option<String>,
        #[arg(long = "target-handle", value_name = "HANDLE")]
        target_handle: Option<String>,
    },

    /// Delete edges by local id and recalculate the graph once
    Unlink {
        #[arg(value_name = "EDGE_ID", required = true)]
        edges: Vec<String>,
    },
}

impl Command {
    /// Does the command work on a canvas (and so need `--installation`)?
    pub fn needs_canvas(&self) -> bool {
        matches!(
            self,
            Command::Show
                | Command::AddProcess { .. }
                | Command::AddProduct { .. }
                | Command::Link { .. }
                | Command::Unlink { .. }
        )
    }
}
