use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use ota_core::error::{OtaError, Result};
use ota_core::scan::prune;
use ota_core::{
    CompressOptions, Es256Signer, ExtractOptions, IgnoreRules, Manifest, ManifestFiles,
    PackOptions, PayloadEntry, ProtectionPolicy, SignOptions, classify, extract, list, pack,
    sign_metadata, verify_manifest_hashes, verify_token,
};
use tracing::{info, warn};

use crate::presentation::cli::{
    ExtractArgs, GenerateArgs, RecordFileArgs, SignArgs, VerifyArgs,
};

fn manifest_files(records: RecordFileArgs, total_regular_size: PathBuf) -> ManifestFiles {
    ManifestFiles {
        dirs: records.directory_file,
        symlinks: records.symlink_file,
        regulars: records.regular_file,
        total_regular_size,
    }
}

pub fn handle_generate(args: GenerateArgs) -> Result<()> {
    let target = fs::canonicalize(&args.target_dir).map_err(|e| OtaError::at(&args.target_dir, e))?;
    fs::create_dir_all(&args.output_dir).map_err(|e| OtaError::at(&args.output_dir, e))?;

    let ignore = IgnoreRules::from_file(&target, &args.ignore_file)?;
    let policy = match &args.protection_policy {
        Some(path) => ProtectionPolicy::from_file(path)?,
        None => ProtectionPolicy::builtin(),
    };

    let classes = classify(&target, &ignore, &policy)?;
    let report = prune::execute(&target, &classes.deletions, Some(&args.output_dir))?;
    if !report.failed.is_empty() {
        warn!(count = report.failed.len(), "some paths could not be deleted");
    }

    if let Some(dir) = &args.compressed_dir {
        fs::create_dir_all(dir).map_err(|e| OtaError::at(dir, e))?;
    }
    let files = manifest_files(args.records, args.total_regular_size_file).relative_to(&args.output_dir);
    let opts = PackOptions {
        prefix: args.prefix,
        compressed_dir: args.compressed_dir,
        compress: CompressOptions {
            min_size: args.compress_filesize,
            min_ratio: args.compress_ratio,
            level: args.compress_level,
            threads: args.compress_threads,
        },
    };
    let stats = pack(&target, &classes, &files, &opts)?;
    eprintln!(
        "generate: {} dirs, {} symlinks, {} regulars, {} bytes ({} deleted)",
        stats.dirs,
        stats.symlinks,
        stats.regulars,
        stats.logical_bytes,
        report.kernels.len() + report.ignored.len()
    );
    if stats.compressed_files > 0 {
        eprintln!(
            "generate: {} blobs, ratio {:.2}",
            stats.compressed_files,
            stats.compression_ratio()
        );
    }
    Ok(())
}

pub fn handle_extract(args: ExtractArgs) -> Result<()> {
    let files = manifest_files(args.records, ManifestFiles::default().total_regular_size);
    let manifest = Manifest::load(&files)?;
    let opts = ExtractOptions {
        compressed_dir: args.compressed_dir,
        progress: args.progress,
    };
    let stats = extract(&manifest, &args.dst_dir, &args.src_dir, &opts)?;
    eprintln!(
        "extract: {} dirs, {} symlinks, {} files ({} from blobs, {} hardlinks) into {}",
        stats.dirs,
        stats.symlinks,
        stats.copied,
        stats.decompressed,
        stats.hardlinks,
        args.dst_dir.display()
    );
    Ok(())
}

pub fn handle_sign(args: SignArgs) -> Result<()> {
    let signer = Es256Signer::from_file(&args.sign_key)?;
    let opts = SignOptions {
        manifest: manifest_files(args.records, args.total_regular_size_file),
        persistent_file: args.persistent_file,
        certificate_file: args.cert_file,
        rootfs_directory: args.rootfs_directory,
        compressed_rootfs_directory: args.compressed_rootfs_directory,
    };
    sign_metadata(&opts, &signer, &args.output)?;
    eprintln!("sign: wrote {}", args.output.display());
    Ok(())
}

pub fn handle_verify(args: VerifyArgs) -> Result<()> {
    let token = read_text(&args.token)?;
    let pem = fs::read(&args.public_key).map_err(|e| OtaError::at(&args.public_key, e))?;
    let entries = verify_token(&token, &pem)?;
    info!(entries = entries.len(), "signature ok");
    verify_manifest_hashes(&entries, &args.manifest_dir)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for entry in &entries {
        writeln!(out, "{}", describe(entry))?;
    }
    eprintln!("verify: OK");
    Ok(())
}

pub fn handle_list(records: RecordFileArgs, total_regular_size: PathBuf) -> Result<()> {
    let files = manifest_files(records, total_regular_size);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    list(&files, &mut out)
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| OtaError::at(path, e))
}

fn describe(entry: &PayloadEntry) -> String {
    match entry {
        PayloadEntry::Version(v) => format!("version {v}"),
        PayloadEntry::File { role, name, hash } => format!("{:<12} {name}  {hash}", role.key()),
        PayloadEntry::RootfsDirectory(d) => format!("{:<12} {d}", "rootfs"),
        PayloadEntry::TotalRegularSize(t) => format!("{:<12} {t}", "total size"),
        PayloadEntry::CompressedRootfsDirectory(d) => format!("{:<12} {d}", "compressed"),
    }
}
