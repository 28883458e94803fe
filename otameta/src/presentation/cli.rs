use clap::{Args, Parser, Subcommand};
use ota_core::container::manifest::{
    DIRECTORY_FILE, REGULAR_FILE, SYMLINK_FILE, TOTAL_REGULAR_SIZE_FILE,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "OTA rootfs metadata tool", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Names of the three record files.
#[derive(Args, Clone, Debug)]
pub struct RecordFileArgs {
    /// directory meta data
    #[arg(long, default_value = DIRECTORY_FILE)]
    pub directory_file: PathBuf,
    /// symbolic link meta data
    #[arg(long, default_value = SYMLINK_FILE)]
    pub symlink_file: PathBuf,
    /// regular file meta data
    #[arg(long, default_value = REGULAR_FILE)]
    pub regular_file: PathBuf,
}

#[derive(Args, Clone, Debug)]
pub struct GenerateArgs {
    /// rootfs to scan; excluded paths are deleted from it
    #[arg(long)]
    pub target_dir: PathBuf,
    /// write `<sha256>.zst` blobs here
    #[arg(long)]
    pub compressed_dir: Option<PathBuf>,
    /// keep a blob only if uncompressed/compressed is at least this
    #[arg(long, default_value_t = 1.25)]
    pub compress_ratio: f64,
    /// files smaller than this are not compressed
    #[arg(long, default_value_t = 16 * 1024)]
    pub compress_filesize: u64,
    #[arg(long, default_value_t = 10)]
    pub compress_level: i32,
    #[arg(long, default_value_t = 2)]
    pub compress_threads: u32,
    /// prepended to every recorded path
    #[arg(long, default_value = "/")]
    pub prefix: PathBuf,
    /// where manifest and audit files are written
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,
    #[command(flatten)]
    pub records: RecordFileArgs,
    #[arg(long, default_value = TOTAL_REGULAR_SIZE_FILE)]
    pub total_regular_size_file: PathBuf,
    /// ignore file, .gitignore format
    #[arg(long, default_value = "ignore.txt")]
    pub ignore_file: PathBuf,
    /// JSON protection policy; the built-in build/src policy when omitted
    #[arg(long)]
    pub protection_policy: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct ExtractArgs {
    /// destination directory, created if missing, must be empty
    #[arg(long)]
    pub dst_dir: PathBuf,
    /// content source directory
    #[arg(long)]
    pub src_dir: PathBuf,
    /// restore compressed entries from this blob store
    #[arg(long)]
    pub compressed_dir: Option<PathBuf>,
    /// show progress
    #[arg(long)]
    pub progress: bool,
    #[command(flatten)]
    pub records: RecordFileArgs,
}

#[derive(Args, Clone, Debug)]
pub struct SignArgs {
    /// PKCS#8 PEM private key (P-256)
    #[arg(long)]
    pub sign_key: PathBuf,
    #[arg(long)]
    pub cert_file: PathBuf,
    #[arg(long)]
    pub persistent_file: PathBuf,
    #[arg(long, default_value = "metadata.jwt")]
    pub output: PathBuf,
    #[command(flatten)]
    pub records: RecordFileArgs,
    #[arg(long, default_value = "rootfs")]
    pub rootfs_directory: String,
    #[arg(long, default_value = TOTAL_REGULAR_SIZE_FILE)]
    pub total_regular_size_file: PathBuf,
    #[arg(long)]
    pub compressed_rootfs_directory: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct VerifyArgs {
    #[arg(long, default_value = "metadata.jwt")]
    pub token: PathBuf,
    /// PEM public key matching the signing key
    #[arg(long)]
    pub public_key: PathBuf,
    /// directory holding the attested files
    #[arg(long, default_value = ".")]
    pub manifest_dir: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a rootfs, prune it and write the manifest files
    Generate(GenerateArgs),

    /// Rebuild a tree from manifest files and a content source
    Extract(ExtractArgs),

    /// Sign manifest hashes into a metadata token
    Sign(SignArgs),

    /// Check a metadata token and the files it attests
    Verify(VerifyArgs),

    /// Print manifest entries
    List {
        #[command(flatten)]
        records: RecordFileArgs,
        #[arg(long, default_value = TOTAL_REGULAR_SIZE_FILE)]
        total_regular_size_file: PathBuf,
    },
}
