use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use zip::read::ZipArchive;

use crate::error::PatchError;

pub const STRIP_STAGE: &str = "strip";
pub const PATCH_STAGE: &str = "patch";
pub const DEFAULT_STRIP_GLOBS: [&str; 2] = ["lib/x86/*", "lib/x86_64/*"];

// `zip --delete` exits with 12 when no entry matched.
const ZIP_NOTHING_TO_DO: i32 = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Clone, Debug)]
pub struct OutputLine {
    pub stage: &'static str,
    pub stream: OutputStream,
    pub text: String,
}

pub type LineCallback<'a> = Option<&'a mut (dyn FnMut(OutputLine) + Send)>;

/// Files handed to the patcher.
#[derive(Clone, Debug)]
pub struct PatchInputs<'a> {
    pub cli: &'a Path,
    pub patches: &'a Path,
    pub integrations: &'a Path,
    pub input: &'a Path,
    pub output: &'a Path,
}

#[derive(Clone, Debug)]
pub struct PatchRunner {
    java: PathBuf,
    zip: PathBuf,
    strip_globs: Vec<String>,
}

impl Default for PatchRunner {
    fn default() -> Self {
        Self::new("java", "zip", DEFAULT_STRIP_GLOBS.iter().map(|g| (*g).to_owned()))
    }
}

impl PatchRunner {
    pub fn new(
        java: impl Into<PathBuf>,
        zip: impl Into<PathBuf>,
        strip_globs: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            java: java.into(),
            zip: zip.into(),
            strip_globs: strip_globs.into_iter().collect(),
        }
    }

    /// Strip the input package in place, then patch it into `inputs.output`.
    pub async fn patch(
        &self,
        inputs: &PatchInputs<'_>,
        mut on_line: LineCallback<'_>,
    ) -> Result<PathBuf, PatchError> {
        let package = inputs.input.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || inspect_package(&package))
            .await
            .map_err(|e| PatchError::InvalidPackage {
                path: inputs.input.display().to_string(),
                message: e.to_string(),
            })??;
        info!(
            "patch: input {} holds {entries} entries",
            inputs.input.display()
        );

        if self.strip_globs.is_empty() {
            debug!("patch: no strip globs configured; skipping strip stage");
        } else {
            let code = run_streaming(STRIP_STAGE, self.strip_command(inputs.input), &mut on_line)
                .await?;
            match code {
                Some(0) => info!("patch: stripped {}", self.strip_globs.join(" ")),
                Some(ZIP_NOTHING_TO_DO) => {
                    warn!(
                        "patch: nothing matched {}; package left as is",
                        self.strip_globs.join(" ")
                    );
                }
                code => {
                    return Err(PatchError::ProcessFailed {
                        stage: STRIP_STAGE,
                        code,
                    });
                }
            }
        }

        let code = run_streaming(PATCH_STAGE, self.patch_command(inputs), &mut on_line).await?;
        if code != Some(0) {
            return Err(PatchError::ProcessFailed {
                stage: PATCH_STAGE,
                code,
            });
        }
        info!("patch: wrote {}", inputs.output.display());
        Ok(inputs.output.to_path_buf())
    }

    pub fn strip_command(&self, input: &Path) -> Command {
        let mut cmd = Command::new(&self.zip);
        cmd.arg("--delete").arg(input).args(&self.strip_globs);
        cmd
    }

    pub fn patch_command(&self, inputs: &PatchInputs<'_>) -> Command {
        let mut cmd = Command::new(&self.java);
        cmd.arg("-jar")
            .arg(inputs.cli)
            .arg("patch")
            .arg("-b")
            .arg(inputs.patches)
            .arg("-m")
            .arg(inputs.integrations)
            .arg(inputs.input)
            .arg("-o")
            .arg(inputs.output);
        cmd
    }
}

/// Count entries of the package, rejecting anything that is not a ZIP archive.
pub fn inspect_package(path: &Path) -> Result<usize, PatchError> {
    let invalid = |message: String| PatchError::InvalidPackage {
        path: path.display().to_string(),
        message,
    };
    let file = fs::File::open(path).map_err(|e| invalid(e.to_string()))?;
    let archive = ZipArchive::new(file).map_err(|e| invalid(e.to_string()))?;
    Ok(archive.len())
}

/// Run `cmd`, forwarding each output line as it arrives. Returns the exit code.
async fn run_streaming(
    stage: &'static str,
    mut cmd: Command,
    on_line: &mut LineCallback<'_>,
) -> Result<Option<i32>, PatchError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    debug!("{stage}: running {:?}", cmd.as_std());

    let mut child = cmd.spawn().map_err(|e| PatchError::Spawn {
        stage,
        message: e.to_string(),
    })?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let readers = [
        child
            .stdout
            .take()
            .map(|out| tokio::spawn(forward_lines(out, OutputStream::Stdout, tx.clone()))),
        child
            .stderr
            .take()
            .map(|err| tokio::spawn(forward_lines(err, OutputStream::Stderr, tx.clone()))),
    ];
    drop(tx);

    while let Some((stream, text)) = rx.recv().await {
        match stream {
            OutputStream::Stdout => info!("{stage}: {text}"),
            OutputStream::Stderr => warn!("{stage}: {text}"),
        }
        if let Some(callback) = on_line.as_deref_mut() {
            callback(OutputLine {
                stage,
                stream,
                text,
            });
        }
    }
    for reader in readers.into_iter().flatten() {
        let _ = reader.await;
    }

    let status = child.wait().await.map_err(|e| PatchError::Spawn {
        stage,
        message: e.to_string(),
    })?;
    debug!("{stage}: exited with {status}");
    Ok(status.code())
}

async fn forward_lines<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::UnboundedSender<(OutputStream, String)>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!("process: failed to read {stream:?}: {err}");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn package(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("youtube-v19.16.39.apk");
        let file = fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for name in ["AndroidManifest.xml", "lib/x86/libfoo.so", "lib/arm64-v8a/libfoo.so"] {
            writer.start_file(name, options).unwrap();
            writer.write_all(b"data").unwrap();
        }
        writer.finish().unwrap();
        path
    }

    struct Fixture {
        dir: TempDir,
        input: PathBuf,
        output: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let input = package(&dir);
            let output = dir.path().join("youtube-revanced-v19.16.39.apk");
            Self { dir, input, output }
        }

        fn inputs(&self) -> PatchInputs<'_> {
            PatchInputs {
                cli: Path::new("cli.jar"),
                patches: Path::new("patches.jar"),
                integrations: Path::new("integrations.apk"),
                input: &self.input,
                output: &self.output,
            }
        }

        fn marker(&self) -> PathBuf {
            self.dir.path().join("patcher-ran")
        }
    }

    #[tokio::test]
    async fn failed_strip_never_runs_patcher() {
        let fx = Fixture::new();
        let zip = script(&fx.dir, "zip", "exit 3");
        let java = script(&fx.dir, "java", &format!("touch '{}'", fx.marker().display()));
        let runner = PatchRunner::new(java, zip, ["lib/x86/*".to_owned()]);

        let err = runner.patch(&fx.inputs(), None).await.unwrap_err();

        assert!(matches!(
            err,
            PatchError::ProcessFailed {
                stage: STRIP_STAGE,
                code: Some(3)
            }
        ));
        assert_eq!(err.stage(), "strip");
        assert!(!fx.marker().exists());
    }

    #[tokio::test]
    async fn passes_artifacts_to_patcher() {
        let fx = Fixture::new();
        let args_file = fx.dir.path().join("args.txt");
        let zip = script(&fx.dir, "zip", "exit 0");
        let java = script(
            &fx.dir,
            "java",
            &format!("echo \"$@\" > '{}'\ntouch \"${{10}}\"", args_file.display()),
        );
        let runner = PatchRunner::new(java, zip, ["lib/x86/*".to_owned()]);

        let output = runner.patch(&fx.inputs(), None).await.unwrap();

        assert_eq!(output, fx.output);
        assert!(fx.output.exists());
        let args = fs::read_to_string(&args_file).unwrap();
        assert_eq!(
            args.trim(),
            format!(
                "-jar cli.jar patch -b patches.jar -m integrations.apk {} -o {}",
                fx.input.display(),
                fx.output.display()
            )
        );
    }

    #[tokio::test]
    async fn nothing_to_strip_is_not_fatal() {
        let fx = Fixture::new();
        let zip = script(&fx.dir, "zip", "echo 'zip error: Nothing to do!' >&2\nexit 12");
        let java = script(&fx.dir, "java", &format!("touch '{}'", fx.marker().display()));
        let runner = PatchRunner::new(java, zip, ["lib/mips/*".to_owned()]);

        runner.patch(&fx.inputs(), None).await.unwrap();

        assert!(fx.marker().exists());
    }

    #[tokio::test]
    async fn failed_patch_reports_patch_stage() {
        let fx = Fixture::new();
        let zip = script(&fx.dir, "zip", "exit 0");
        let java = script(&fx.dir, "java", "echo 'Patch failed' >&2\nexit 1");
        let runner = PatchRunner::new(java, zip, ["lib/x86/*".to_owned()]);

        let err = runner.patch(&fx.inputs(), None).await.unwrap_err();

        assert!(matches!(
            err,
            PatchError::ProcessFailed {
                stage: PATCH_STAGE,
                code: Some(1)
            }
        ));
    }

    #[tokio::test]
    async fn streams_both_output_streams() {
        let fx = Fixture::new();
        let zip = script(&fx.dir, "zip", "echo 'deleting: lib/x86/libfoo.so'");
        let java = script(
            &fx.dir,
            "java",
            "echo 'INFO: Executing patches'\necho 'WARNING: slow' >&2\necho 'INFO: Saved'",
        );
        let runner = PatchRunner::new(java, zip, ["lib/x86/*".to_owned()]);
        let mut lines = Vec::new();
        let mut collect = |line: OutputLine| lines.push(line);

        runner.patch(&fx.inputs(), Some(&mut collect)).await.unwrap();

        let stdout: Vec<_> = lines
            .iter()
            .filter(|l| l.stage == PATCH_STAGE && l.stream == OutputStream::Stdout)
            .map(|l| l.text.as_str())
            .collect();
        assert_eq!(stdout, vec!["INFO: Executing patches", "INFO: Saved"]);
        assert!(
            lines
                .iter()
                .any(|l| l.stream == OutputStream::Stderr && l.text == "WARNING: slow")
        );
        assert!(lines.iter().any(|l| l.stage == STRIP_STAGE && l.text.contains("deleting")));
    }

    #[tokio::test]
    async fn rejects_non_archive_input() {
        let fx = Fixture::new();
        fs::write(&fx.input, "<html>not a package</html>").unwrap();
        let zip = script(&fx.dir, "zip", &format!("touch '{}'", fx.marker().display()));
        let runner = PatchRunner::new("java", zip, ["lib/x86/*".to_owned()]);

        let err = runner.patch(&fx.inputs(), None).await.unwrap_err();

        assert!(matches!(err, PatchError::InvalidPackage { .. }));
        assert!(!fx.marker().exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_input_fails_inspection_before_any_stage() {
        let fx = Fixture::new();
        fs::remove_file(&fx.input).unwrap();
        let zip = script(&fx.dir, "zip", &format!("touch '{}'", fx.marker().display()));
        let runner = PatchRunner::new("java", zip, ["lib/x86/*".to_owned()]);

        let err = runner.patch(&fx.inputs(), None).await.unwrap_err();

        assert!(matches!(
            &err,
            PatchError::InvalidPackage { path, .. } if path.ends_with("youtube-v19.16.39.apk")
        ));
        assert_eq!(err.stage(), "inspect");
        assert!(!fx.marker().exists());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let fx = Fixture::new();
        let runner = PatchRunner::new(
            "java",
            fx.dir.path().join("no-such-zip"),
            ["lib/x86/*".to_owned()],
        );
        let err = runner.patch(&fx.inputs(), None).await.unwrap_err();
        assert!(matches!(err, PatchError::Spawn { stage: STRIP_STAGE, .. }));
    }

    #[test]
    fn counts_package_entries() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(inspect_package(&package(&dir)).unwrap(), 3);
    }
}
