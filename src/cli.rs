use clap::{Parser, Subcommand, ValueHint, builder::styling::AnsiColor};

/// memsift – scan and mutate another process's memory.
#[derive(Parser, Debug)]
#[command(
    name = "memsift",
    bin_name = "memsift",
    about = "Scan a process's memory for values and narrow them down",
    version,
    propagate_version = true,
    arg_required_else_help = true,
    styles = clap::builder::Styles::styled()
        .header(AnsiColor::BrightYellow.on_default())
        .usage(AnsiColor::BrightYellow.on_default())
        .literal(AnsiColor::BrightGreen.on_default())
        .placeholder(AnsiColor::BrightCyan.on_default())
)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, clap::Args)]
pub struct TypeFlags {
    /// Scan 8-bit signed integers
    #[arg(long = "i8")]
    pub i8_: bool,
    /// Scan 16-bit signed integers
    #[arg(long = "i16")]
    pub i16_: bool,
    /// Scan 32-bit signed integers
    #[arg(long = "i32")]
    pub i32_: bool,
    /// Scan 64-bit signed integers
    #[arg(long = "i64")]
    pub i64_: bool,
    /// Scan 8-bit unsigned integers
    #[arg(long = "u8")]
    pub u8_: bool,
    /// Scan 16-bit unsigned integers
    #[arg(long = "u16")]
    pub u16_: bool,
    /// Scan 32-bit unsigned integers
    #[arg(long = "u32")]
    pub u32_: bool,
    /// Scan 64-bit unsigned integers
    #[arg(long = "u64")]
    pub u64_: bool,
    /// Scan 32-bit floats
    #[arg(long = "f32")]
    pub f32_: bool,
    /// Scan 64-bit floats
    #[arg(long = "f64")]
    pub f64_: bool,
}

impl TypeFlags {
    pub fn to_set(&self) -> libmemsift::TypeSet {
        use libmemsift::TypeSet;
        let mut set = TypeSet::empty();
        for (on, bit) in [
            (self.i8_, TypeSet::I8),
            (self.i16_, TypeSet::I16),
            (self.i32_, TypeSet::I32),
            (self.i64_, TypeSet::I64),
            (self.u8_, TypeSet::U8),
            (self.u16_, TypeSet::U16),
            (self.u32_, TypeSet::U32),
            (self.u64_, TypeSet::U64),
            (self.f32_, TypeSet::F32),
            (self.f64_, TypeSet::F64),
        ] {
            if on {
                set |= bit;
            }
        }
        set
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// One-shot scan: print every match for an expression
    Scan {
        /// Target process name or PID (e.g. "game" or 1234)
        target: String,

        /// Comparator expression (e.g. "= 100", "=[10,20]", "$new&0xff")
        #[arg(value_hint = ValueHint::Other)]
        expr: String,

        #[command(flatten)]
        types: TypeFlags,

        /// Stride in bytes (defaults to the narrowest type width)
        #[arg(short, long, default_value_t = 0)]
        step: usize,

        /// Suspend the target (and same-user processes) while scanning
        #[arg(long)]
        suspend: bool,

        /// Cap on printed matches
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Interactive scan/filter shell over one session
    Shell {
        /// Target process name or PID, or a snapshot sidecar .json path
        target: String,

        #[command(flatten)]
        types: TypeFlags,

        /// Stride in bytes (defaults to the narrowest type width)
        #[arg(short, long, default_value_t = 0)]
        step: usize,
    },

    /// Save a process snapshot for offline scanning
    Snapshot {
        /// Target process name or PID
        target: String,

        /// Output path stem; writes <path>.json and <path>.memory
        #[arg(value_hint = ValueHint::FilePath)]
        output: std::path::PathBuf,

        /// Compress each region with zstd
        #[arg(short, long)]
        compress: bool,

        /// zstd level
        #[arg(long, default_value_t = 3)]
        level: i32,
    },
}
