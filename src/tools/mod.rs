// src/tools/mod.rs

//! External conversion tool invocation
//!
//! Thin, stateless wrappers around the executables that do the actual image
//! work. Every invocation returns a [`StageOutcome`]; a tool that exits
//! non-zero, cannot be started, or times out yields `success == false` with
//! the command line, exit status and captured output in the message.
//!
//! Tools used per stage:
//! - decompress-tiff: libtiff `tiffcp`
//! - decompress-jp2: Kakadu `kdu_expand`
//! - color-normalize: libtiff `tiff2rgba` or Little CMS `tifficc`
//! - preconvert: ImageMagick `convert`
//! - compress: Kakadu `kdu_compress`, default parameters then base parameters
//!
//! The kdu_compress parameter set is relied upon by the downstream IIIF image
//! server and must not change.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use wait_timeout::ChildExt;

use crate::classifier::Stage;

/// Quality layer rates for kdu_compress
pub const KDU_RATE: &str =
    "2.4,1.48331273,.91673033,.56657224,.35016049,.21641118,.13374944,.08266171";

/// kdu_compress options shared by both parameter sets
pub const KDU_COMPRESS_BASE_OPTS: &[&str] = &[
    "-quiet",
    "-rate",
    KDU_RATE,
    "Creversible=yes",
    "Clevels=7",
    "Cblk={64,64}",
    "Cuse_sop=yes",
    "Cuse_eph=yes",
    "Corder=RLCP",
    "ORGgen_plt=yes",
    "ORGtparts=R",
    "Stiles={1024,1024}",
    "-double_buffering",
    "10",
    "-num_threads",
    "4",
    "-no_weights",
];

/// Appended to the base options for the default attempt
pub const KDU_SRGB_OPTS: &[&str] = &["-jp2_space", "sRGB"];

/// Which tool implements the color-normalize stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorNormalizer {
    /// libtiff `tiff2rgba -c none`
    #[default]
    Tiff2Rgba,
    /// Little CMS `tifficc` ICC profile applier
    Tifficc,
}

impl ColorNormalizer {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "tiff2rgba" | "libtiff" => Some(Self::Tiff2Rgba),
            "tifficc" | "lcms" | "little-cms" => Some(Self::Tifficc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tiff2Rgba => "tiff2rgba",
            Self::Tifficc => "tifficc",
        }
    }
}

/// Locations of the external executables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub tiffcp: PathBuf,
    pub kdu_expand: PathBuf,
    pub kdu_compress: PathBuf,
    pub magick_convert: PathBuf,
    pub tiff2rgba: PathBuf,
    pub tifficc: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            tiffcp: PathBuf::from("/usr/local/bin/tiffcp"),
            kdu_expand: PathBuf::from("/usr/local/bin/kdu_expand"),
            kdu_compress: PathBuf::from("/usr/local/bin/kdu_compress"),
            magick_convert: PathBuf::from("/usr/local/bin/convert"),
            tiff2rgba: PathBuf::from("/usr/local/bin/tiff2rgba"),
            tifficc: PathBuf::from("/usr/local/bin/tifficc"),
        }
    }
}

impl ToolPaths {
    /// (name, path) for every configured tool
    pub fn all(&self) -> [(&'static str, &Path); 6] {
        [
            ("tiffcp", self.tiffcp.as_path()),
            ("kdu_expand", self.kdu_expand.as_path()),
            ("kdu_compress", self.kdu_compress.as_path()),
            ("convert", self.magick_convert.as_path()),
            ("tiff2rgba", self.tiff2rgba.as_path()),
            ("tifficc", self.tifficc.as_path()),
        ]
    }
}

/// Result of one stage: success flag plus a diagnostic message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub success: bool,
    pub message: String,
}

impl StageOutcome {
    fn ok(message: String) -> Self {
        info!("{}", message);
        Self {
            success: true,
            message,
        }
    }

    fn failed(message: String) -> Self {
        error!("{}", message);
        Self {
            success: false,
            message,
        }
    }
}

/// A tool invocation that did not exit zero
#[derive(Debug, Clone)]
struct ToolFailure {
    tool: &'static str,
    command: String,
    status: String,
    output: String,
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}` command failed: {}\nreturncode was: {}\noutput was: {}",
            self.tool, self.command, self.status, self.output
        )
    }
}

/// Runs conversion stages by shelling out to the configured tools
#[derive(Debug, Clone)]
pub struct ToolInvoker {
    paths: ToolPaths,
    color: ColorNormalizer,
    timeout: Option<Duration>,
}

impl ToolInvoker {
    pub fn new(paths: ToolPaths, color: ColorNormalizer) -> Self {
        Self {
            paths,
            color,
            timeout: None,
        }
    }

    /// Kill tools that run longer than `timeout` (the default is to wait)
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn paths(&self) -> &ToolPaths {
        &self.paths
    }

    pub fn color_normalizer(&self) -> ColorNormalizer {
        self.color
    }

    /// Run one stage, reading `input` and writing `output`
    pub fn run(&self, stage: Stage, input: &Path, output: &Path) -> StageOutcome {
        match stage {
            Stage::DecompressTiff => self.uncompress_tiff(input, output),
            Stage::DecompressJp2 => self.uncompress_jp2(input, output),
            Stage::ColorNormalize => match self.color {
                ColorNormalizer::Tiff2Rgba => self.srgb_libtiff(input, output),
                ColorNormalizer::Tifficc => self.srgb_little_cms(input, output),
            },
            Stage::Preconvert => self.pre_convert(input, output),
            Stage::Compress => self.compress(input, output),
        }
    }

    fn uncompress_tiff(&self, input: &Path, output: &Path) -> StageOutcome {
        let args = [os("-c"), os("none"), input.into(), output.into()];
        match self.exec("tiffcp", &self.paths.tiffcp, &args) {
            Ok(_) => StageOutcome::ok(format!(
                "File uncompressed. Input: {}, output: {}",
                input.display(),
                output.display()
            )),
            Err(failure) => StageOutcome::failed(failure.to_string()),
        }
    }

    fn uncompress_jp2(&self, input: &Path, output: &Path) -> StageOutcome {
        let args = [os("-i"), input.into(), os("-o"), output.into()];
        match self.exec("kdu_expand", &self.paths.kdu_expand, &args) {
            Ok(_) => StageOutcome::ok(format!(
                "File uncompressed using kdu_expand. Input: {}, output: {}",
                input.display(),
                output.display()
            )),
            Err(failure) => StageOutcome::failed(failure.to_string()),
        }
    }

    fn pre_convert(&self, input: &Path, output: &Path) -> StageOutcome {
        let args = [
            os("-compress"),
            os("None"),
            os("-quality"),
            os("100"),
            os("-auto-orient"),
            input.into(),
            output.into(),
        ];
        match self.exec("convert", &self.paths.magick_convert, &args) {
            Ok(_) => StageOutcome::ok(format!(
                "Used ImageMagick convert to convert {} to {}",
                input.display(),
                output.display()
            )),
            Err(failure) => StageOutcome::failed(failure.to_string()),
        }
    }

    fn srgb_libtiff(&self, input: &Path, output: &Path) -> StageOutcome {
        let args = [os("-c"), os("none"), input.into(), output.into()];
        match self.exec("tiff2rgba", &self.paths.tiff2rgba, &args) {
            Ok(_) => StageOutcome::ok(format!(
                "Used tiff2rgba to convert {} to {}, with color profile sRGB (if not already sRGB)",
                input.display(),
                output.display()
            )),
            Err(failure) => StageOutcome::failed(failure.to_string()),
        }
    }

    fn srgb_little_cms(&self, input: &Path, output: &Path) -> StageOutcome {
        let args = [OsString::from(input), OsString::from(output)];
        match self.exec("tifficc", &self.paths.tifficc, &args) {
            Ok(_) => StageOutcome::ok(format!(
                "Used tifficc to convert {} to {}, with color profile sRGB (if not already sRGB)",
                input.display(),
                output.display()
            )),
            Err(failure) => StageOutcome::failed(failure.to_string()),
        }
    }

    /// Lossless JPEG 2000 encode
    ///
    /// The default attempt tags the output as sRGB. kdu_compress refuses that
    /// tag for some inputs (e.g. greyscale), so a failure is retried once
    /// with the base parameters.
    fn compress(&self, input: &Path, output: &Path) -> StageOutcome {
        let default_args = compress_args(input, output, true);
        let default_failure = match self.exec("kdu_compress", &self.paths.kdu_compress, &default_args)
        {
            Ok(_) => {
                return StageOutcome::ok(format!(
                    "{} converted to {}",
                    input.display(),
                    output.display()
                ));
            }
            Err(failure) => failure,
        };

        info!("A kdu_compress command failed. Trying alternate.");
        let base_args = compress_args(input, output, false);
        match self.exec("kdu_compress", &self.paths.kdu_compress, &base_args) {
            Ok(_) => StageOutcome::ok(format!(
                "{} converted to {} using base parameters without sRGB tagging \
                 (default parameters failed with returncode {})",
                input.display(),
                output.display(),
                default_failure.status
            )),
            Err(base_failure) => StageOutcome::failed(format!(
                "kdu_compress failed with default and base parameters.\n\
                 default attempt: {}\nbase attempt: {}",
                default_failure, base_failure
            )),
        }
    }

    /// Run a tool to completion, returning its combined output on success
    fn exec(
        &self,
        tool: &'static str,
        program: &Path,
        args: &[OsString],
    ) -> std::result::Result<String, ToolFailure> {
        let command = render_command(program, args);
        debug!("Executing: {}", command);

        let failure = |status: String, output: String| ToolFailure {
            tool,
            command: command.clone(),
            status,
            output,
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| failure(format!("could not be started ({})", e), String::new()))?;

        // Drain both pipes while waiting so a chatty tool never blocks on a
        // full pipe
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match self.timeout {
            None => child
                .wait()
                .map_err(|e| failure(format!("could not be awaited ({})", e), String::new()))?,
            Some(timeout) => match child.wait_timeout(timeout) {
                Ok(Some(status)) => status,
                Ok(None) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    // Readers are left detached: a grandchild may still hold
                    // the pipes open
                    return Err(failure(
                        format!("timed out after {:?}", timeout),
                        String::new(),
                    ));
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(failure(format!("could not be awaited ({})", e), String::new()));
                }
            },
        };
        let result = Output {
            status,
            stdout: join_drained(stdout),
            stderr: join_drained(stderr),
        };

        let mut combined = String::from_utf8_lossy(&result.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&result.stderr));
        for line in combined.lines() {
            debug!("[{}] {}", tool, line);
        }

        if result.status.success() {
            Ok(combined)
        } else {
            let status = match result.status.code() {
                Some(code) => code.to_string(),
                None => {
                    warn!("{} was terminated by a signal", tool);
                    "terminated by signal".to_string()
                }
            };
            Err(failure(status, combined))
        }
    }
}

/// Read a pipe to the end on its own thread
fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_drained(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Full kdu_compress argument list, with or without the sRGB tag
pub fn compress_args(input: &Path, output: &Path, srgb: bool) -> Vec<OsString> {
    let mut args = vec![os("-i"), input.into(), os("-o"), output.into()];
    args.extend(KDU_COMPRESS_BASE_OPTS.iter().map(|opt| os(opt)));
    if srgb {
        args.extend(KDU_SRGB_OPTS.iter().map(|opt| os(opt)));
    }
    args
}

fn os(s: &str) -> OsString {
    OsStr::new(s).to_os_string()
}

fn render_command(program: &Path, args: &[OsString]) -> String {
    let mut parts = vec![program.to_string_lossy().into_owned()];
    parts.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Write an executable shell script standing in for a tool
    fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Copies the last-but-one argument to the last argument
    const COPY_TOOL: &str = r#"for last; do :; done
prev=""
for a in "$@"; do [ "$a" = "$last" ] || prev="$a"; done
cp "$prev" "$last""#;

    /// kdu_compress stand-in: writes the -o argument, optionally refusing sRGB
    fn kdu_script(reject_srgb: bool, always_fail: bool) -> String {
        let mut body = String::new();
        if always_fail {
            body.push_str("echo 'Kakadu Error: bad input' >&2\nexit 2\n");
        }
        if reject_srgb {
            body.push_str(
                "for a in \"$@\"; do if [ \"$a\" = \"-jp2_space\" ]; then echo 'cannot tag sRGB' >&2; exit 3; fi; done\n",
            );
        }
        body.push_str(
            "while [ $# -gt 0 ]; do if [ \"$1\" = \"-o\" ]; then shift; echo jp2 > \"$1\"; fi; shift; done",
        );
        body
    }

    fn invoker_with(dir: &Path, kdu_body: &str) -> ToolInvoker {
        let paths = ToolPaths {
            tiffcp: fake_tool(dir, "tiffcp", COPY_TOOL),
            kdu_expand: fake_tool(dir, "kdu_expand", "exit 0"),
            kdu_compress: fake_tool(dir, "kdu_compress", kdu_body),
            magick_convert: fake_tool(dir, "convert", COPY_TOOL),
            tiff2rgba: fake_tool(dir, "tiff2rgba", "echo 'not a tiff' >&2\nexit 1"),
            tifficc: fake_tool(dir, "tifficc", COPY_TOOL),
        };
        ToolInvoker::new(paths, ColorNormalizer::Tiff2Rgba)
    }

    #[test]
    fn test_compress_args_are_fixed() {
        let args = compress_args(Path::new("in.tif"), Path::new("out.jp2"), true);
        let rendered: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            rendered,
            vec![
                "-i", "in.tif", "-o", "out.jp2", "-quiet", "-rate",
                "2.4,1.48331273,.91673033,.56657224,.35016049,.21641118,.13374944,.08266171",
                "Creversible=yes", "Clevels=7", "Cblk={64,64}", "Cuse_sop=yes", "Cuse_eph=yes",
                "Corder=RLCP", "ORGgen_plt=yes", "ORGtparts=R", "Stiles={1024,1024}",
                "-double_buffering", "10", "-num_threads", "4", "-no_weights",
                "-jp2_space", "sRGB",
            ]
        );

        let base = compress_args(Path::new("in.tif"), Path::new("out.jp2"), false);
        assert_eq!(base.len(), rendered.len() - 2);
        assert!(!base.iter().any(|a| a == "-jp2_space"));
    }

    #[test]
    fn test_compress_default_succeeds() {
        let tmp = TempDir::new().unwrap();
        let invoker = invoker_with(tmp.path(), &kdu_script(false, false));
        let input = tmp.path().join("in.tif");
        let output = tmp.path().join("out.jp2");
        fs::write(&input, b"tiff").unwrap();

        let outcome = invoker.run(Stage::Compress, &input, &output);
        assert!(outcome.success);
        assert!(!outcome.message.contains("base parameters"));
        assert!(output.exists());
    }

    #[test]
    fn test_compress_falls_back_to_base_parameters() {
        let tmp = TempDir::new().unwrap();
        let invoker = invoker_with(tmp.path(), &kdu_script(true, false));
        let input = tmp.path().join("in.tif");
        let output = tmp.path().join("out.jp2");
        fs::write(&input, b"tiff").unwrap();

        let outcome = invoker.run(Stage::Compress, &input, &output);
        assert!(outcome.success, "{}", outcome.message);
        assert!(outcome.message.contains("base parameters"));
        assert!(outcome.message.contains("returncode 3"));
        assert!(output.exists());
    }

    #[test]
    fn test_compress_reports_both_failures() {
        let tmp = TempDir::new().unwrap();
        let invoker = invoker_with(tmp.path(), &kdu_script(false, true));
        let input = tmp.path().join("in.tif");
        let output = tmp.path().join("out.jp2");
        fs::write(&input, b"tiff").unwrap();

        let outcome = invoker.run(Stage::Compress, &input, &output);
        assert!(!outcome.success);
        assert!(outcome.message.contains("default attempt"));
        assert!(outcome.message.contains("base attempt"));
        assert!(outcome.message.contains("Kakadu Error"));
        assert!(outcome.message.contains("returncode was: 2"));
    }

    #[test]
    fn test_tool_failure_is_captured_not_raised() {
        let tmp = TempDir::new().unwrap();
        let invoker = invoker_with(tmp.path(), &kdu_script(false, false));
        let input = tmp.path().join("in.tif");
        let output = tmp.path().join("srgb.tif");
        fs::write(&input, b"tiff").unwrap();

        let outcome = invoker.run(Stage::ColorNormalize, &input, &output);
        assert!(!outcome.success);
        assert!(outcome.message.contains("tiff2rgba"));
        assert!(outcome.message.contains("returncode was: 1"));
        assert!(outcome.message.contains("not a tiff"));
        assert!(outcome.message.contains(&input.display().to_string()));
    }

    #[test]
    fn test_missing_executable_is_a_failure() {
        let paths = ToolPaths {
            tiffcp: PathBuf::from("/nonexistent/tiffcp"),
            ..ToolPaths::default()
        };
        let invoker = ToolInvoker::new(paths, ColorNormalizer::default());
        let outcome = invoker.run(
            Stage::DecompressTiff,
            Path::new("/tmp/in.tif"),
            Path::new("/tmp/out.tif"),
        );
        assert!(!outcome.success);
        assert!(outcome.message.contains("could not be started"));
    }

    #[test]
    fn test_input_left_untouched() {
        let tmp = TempDir::new().unwrap();
        let invoker = invoker_with(tmp.path(), &kdu_script(false, false));
        let input = tmp.path().join("in.tif");
        let output = tmp.path().join("uncompressed.tif");
        fs::write(&input, b"original").unwrap();

        let outcome = invoker.run(Stage::DecompressTiff, &input, &output);
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(fs::read(&input).unwrap(), b"original");
        assert_eq!(fs::read(&output).unwrap(), b"original");
    }

    #[test]
    fn test_alternate_color_normalizer() {
        let tmp = TempDir::new().unwrap();
        let invoker = invoker_with(tmp.path(), &kdu_script(false, false));
        let invoker = ToolInvoker::new(invoker.paths().clone(), ColorNormalizer::Tifficc);
        let input = tmp.path().join("in.tif");
        let output = tmp.path().join("srgb.tif");
        fs::write(&input, b"tiff").unwrap();

        let outcome = invoker.run(Stage::ColorNormalize, &input, &output);
        assert!(outcome.success, "{}", outcome.message);
        assert!(outcome.message.contains("tifficc"));
    }

    #[test]
    fn test_timeout_is_a_failure() {
        let tmp = TempDir::new().unwrap();
        let mut paths = invoker_with(tmp.path(), "exit 0").paths().clone();
        paths.kdu_expand = fake_tool(tmp.path(), "slow_expand", "sleep 5");
        let invoker = ToolInvoker::new(paths, ColorNormalizer::default())
            .with_timeout(Some(Duration::from_millis(200)));

        let outcome = invoker.run(
            Stage::DecompressJp2,
            &tmp.path().join("in.jp2"),
            &tmp.path().join("out.tif"),
        );
        assert!(!outcome.success);
        assert!(outcome.message.contains("timed out"));
    }

    #[test]
    fn test_chatty_tool_finishes_under_timeout() {
        let tmp = TempDir::new().unwrap();
        let mut paths = invoker_with(tmp.path(), "exit 0").paths().clone();
        // Far more warning output than a pipe buffer holds
        paths.tiffcp = fake_tool(
            tmp.path(),
            "chatty_tiffcp",
            &format!(
                "i=0; while [ $i -lt 6000 ]; do echo 'TIFFReadDirectory: Warning, Unknown field with tag 50341 (0xc4a5) encountered' >&2; i=$((i+1)); done\n{}",
                COPY_TOOL
            ),
        );
        let invoker = ToolInvoker::new(paths, ColorNormalizer::default())
            .with_timeout(Some(Duration::from_secs(20)));
        let input = tmp.path().join("in.tif");
        let output = tmp.path().join("out.tif");
        fs::write(&input, b"tiff").unwrap();

        let started = std::time::Instant::now();
        let outcome = invoker.run(Stage::DecompressTiff, &input, &output);
        assert!(outcome.success, "{}", &outcome.message[..outcome.message.len().min(300)]);
        assert!(started.elapsed() < Duration::from_secs(20));
        assert_eq!(fs::read(&output).unwrap(), b"tiff");
    }

    #[test]
    fn test_timeout_message_keeps_subsecond_precision() {
        let tmp = TempDir::new().unwrap();
        let mut paths = invoker_with(tmp.path(), "exit 0").paths().clone();
        paths.kdu_expand = fake_tool(tmp.path(), "slow_expand", "sleep 5");
        let invoker = ToolInvoker::new(paths, ColorNormalizer::default())
            .with_timeout(Some(Duration::from_millis(200)));

        let outcome = invoker.run(
            Stage::DecompressJp2,
            &tmp.path().join("in.jp2"),
            &tmp.path().join("out.tif"),
        );
        assert!(outcome.message.contains("timed out after 200ms"), "{}", outcome.message);
    }

    #[test]
    fn test_color_normalizer_parse() {
        assert_eq!(ColorNormalizer::parse("tiff2rgba"), Some(ColorNormalizer::Tiff2Rgba));
        assert_eq!(ColorNormalizer::parse("TIFFICC"), Some(ColorNormalizer::Tifficc));
        assert_eq!(ColorNormalizer::parse("gimp"), None);
    }
}
