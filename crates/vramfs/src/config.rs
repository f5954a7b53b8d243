use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "vramfs", version, about)]
struct Args {
    /// Directory to mount the filesystem on.
    #[arg(env = "VRAMFS_MOUNTPOINT")]
    mountpoint: PathBuf,

    /// Amount of GPU memory to reserve for file content, e.g. `512M` or `2G`.
    ///
    /// Rounded up to whole blocks. `0` mounts without touching the GPU.
    ///
    /// Environment variable: `VRAMFS_SIZE`.
    #[arg(long, env = "VRAMFS_SIZE", default_value = "0", value_parser = parse_size)]
    size: u64,

    /// Use the in-process software device instead of a GPU.
    ///
    /// Environment variable: `VRAMFS_SOFTWARE_DEVICE`.
    #[arg(long, env = "VRAMFS_SOFTWARE_DEVICE")]
    software_device: bool,

    /// Allow users other than the one mounting to access the filesystem.
    #[arg(long, env = "VRAMFS_ALLOW_OTHER")]
    allow_other: bool,

    /// Log filter (tracing-subscriber EnvFilter syntax). Takes precedence over `RUST_LOG`.
    ///
    /// Environment variable: `VRAMFS_LOG_LEVEL`.
    #[arg(long, env = "VRAMFS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Mount option passed through to FUSE unchanged. May be repeated or comma separated.
    #[arg(short = 'o', value_name = "OPTION", value_delimiter = ',')]
    options: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub mountpoint: PathBuf,
    /// Requested pool size in bytes.
    pub pool_size: u64,
    pub software_device: bool,
    pub allow_other: bool,
    pub log_level: Option<String>,
    pub mount_options: Vec<String>,
}

impl Config {
    /// Parse the process arguments, exiting with usage on error.
    pub fn load() -> Self {
        Self::from_args(Args::parse())
    }

    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Args::try_parse_from(args).map(Self::from_args)
    }

    fn from_args(args: Args) -> Self {
        let log_level = args.log_level.and_then(|v| {
            let v = v.trim().to_string();
            (!v.is_empty()).then_some(v)
        });

        Self {
            mountpoint: args.mountpoint,
            pool_size: args.size,
            software_device: args.software_device,
            allow_other: args.allow_other,
            log_level,
            mount_options: args
                .options
                .into_iter()
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
        }
    }
}

/// Parse a byte count with an optional binary `K`, `M` or `G` suffix.
pub fn parse_size(value: &str) -> Result<u64, String> {
    let value = value.trim();
    let (digits, shift) = match value.as_bytes().last() {
        Some(b'k' | b'K') => (&value[..value.len() - 1], 10),
        Some(b'm' | b'M') => (&value[..value.len() - 1], 20),
        Some(b'g' | b'G') => (&value[..value.len() - 1], 30),
        _ => (value, 0),
    };

    let count: u64 = digits
        .parse()
        .map_err(|_| format!("invalid size {value:?}"))?;
    count
        .checked_mul(1 << shift)
        .ok_or_else(|| format!("size {value:?} is too large"))
}
