//! xsltkit - apply XSLT stylesheets to XML and HTML files
//!
//! This is the main CLI entry point. Inputs are parsed and transformed
//! through the async path of the runtime, so parsing and transforms run on
//! the worker pool while results are written from the main thread.

mod cli;
mod version;

use std::cell::RefCell;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use xsltkit_core::{pool, Config, OperationKind, Runtime, Value};

use cli::Args;

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.version {
        if args.verbose {
            version::print_version_verbose();
        } else {
            version::print_version();
        }
        return ExitCode::SUCCESS;
    }

    match run(args) {
        Ok(report) if report.failed == 0 => ExitCode::SUCCESS,
        Ok(report) => {
            eprintln!("error: {} of {} files failed", report.failed, report.total);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr; `RUST_LOG` wins over `--verbose`
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Expand glob patterns to file paths
fn expand_globs(patterns: &[String]) -> Vec<String> {
    let mut files = Vec::new();

    for pattern in patterns {
        if pattern.contains('*') || pattern.contains('?') {
            match glob::glob(pattern) {
                Ok(paths) => {
                    for entry in paths.flatten() {
                        if entry.is_file() {
                            if let Some(path) = entry.to_str() {
                                files.push(path.to_string());
                            }
                        }
                    }
                }
                Err(e) => {
                    eprintln!("Invalid glob pattern '{}': {}", pattern, e);
                }
            }
        } else {
            // Not a glob, use as-is
            files.push(pattern.clone());
        }
    }

    files
}

/// Where transform results go
enum Destination {
    Stdout,
    Dir(PathBuf),
}

impl Destination {
    fn path_for(dir: &Path, input: &str) -> PathBuf {
        let stem = Path::new(input)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        dir.join(format!("{}.out", stem))
    }

    fn write(&self, input: &str, output: &str) -> io::Result<()> {
        match self {
            Destination::Stdout => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(output.as_bytes())?;
                stdout.flush()
            }
            Destination::Dir(dir) => fs::write(Self::path_for(dir, input), output),
        }
    }
}

/// Outcome of a run over all input files
#[derive(Debug, Default)]
struct Report {
    total: usize,
    failed: usize,
}

/// Collects results from callbacks on the main thread
struct Sink {
    destination: Destination,
    report: Report,
}

impl Sink {
    fn finish(&mut self, input: &str, result: Result<String, String>) {
        let outcome = result.and_then(|output| {
            self.destination
                .write(input, &output)
                .map_err(|e| format!("cannot write output: {}", e))
        });
        if let Err(message) = outcome {
            eprintln!("{}: {}", input, message);
            self.report.failed += 1;
        }
    }
}

fn run(args: Args) -> anyhow::Result<Report> {
    let stylesheet_path = args
        .stylesheet
        .as_deref()
        .context("no stylesheet given (use -s FILE)")?;

    let files = expand_globs(&args.files);
    if files.is_empty() {
        eprintln!("Usage: xsltkit -s <stylesheet> [-p NAME VALUE]... <files...>");
        eprintln!("\nUse --help for more information.");
        bail!("no input files");
    }

    let destination = match &args.output_dir {
        Some(dir) => {
            fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir))?;
            Destination::Dir(PathBuf::from(dir))
        }
        None => Destination::Stdout,
    };

    // Configure worker pool
    let config = pool::configure(&Config::from_env().with_threads(args.concurrency));
    tracing::debug!(threads = config.threads, files = files.len(), "starting");

    let mut runtime = Runtime::new();
    let stylesheet = runtime.call(OperationKind::ReadXsltFile, &[Value::from(stylesheet_path)])?;

    let params = Value::Array(
        args.param_pairs()
            .into_iter()
            .flat_map(|(name, value)| [Value::from(name), Value::from(value)])
            .collect(),
    );
    let read = if args.html {
        OperationKind::ReadHtmlFile
    } else {
        OperationKind::ReadXmlFile
    };

    let sink = Rc::new(RefCell::new(Sink {
        destination,
        report: Report {
            total: files.len(),
            failed: 0,
        },
    }));

    if args.sync {
        for file in &files {
            let result = runtime
                .call(read, &[Value::from(file.as_str())])
                .and_then(|document| {
                    runtime.call(
                        OperationKind::Transform,
                        &[stylesheet.clone(), document, params.clone()],
                    )
                })
                .map(|output| output.into_string().unwrap_or_default())
                .map_err(|e| e.to_string());
            sink.borrow_mut().finish(file, result);
        }
    } else {
        for file in &files {
            submit(&mut runtime, read, file, &stylesheet, &params, &sink)?;
        }
        runtime.run_until_idle()?;
    }

    let sink = sink.borrow();
    Ok(Report {
        total: sink.report.total,
        failed: sink.report.failed,
    })
}

/// Read `file` on the pool, then transform it on the pool
fn submit(
    runtime: &mut Runtime,
    read: OperationKind,
    file: &str,
    stylesheet: &Value,
    params: &Value,
    sink: &Rc<RefCell<Sink>>,
) -> anyhow::Result<()> {
    let input = file.to_string();
    let stylesheet = stylesheet.clone();
    let params = params.clone();
    let sink = sink.clone();

    let on_document = Value::callback(move |runtime, error, document| {
        let document = match (error, document) {
            (Some(error), _) => {
                sink.borrow_mut().finish(&input, Err(error.to_string()));
                return Ok(());
            }
            (None, document) => document.unwrap_or_default(),
        };

        let output_for = input.clone();
        let output_sink = sink.clone();
        let on_output = Value::callback(move |_, error, output| {
            let result = match error {
                Some(error) => Err(error.to_string()),
                None => Ok(output.and_then(Value::into_string).unwrap_or_default()),
            };
            output_sink.borrow_mut().finish(&output_for, result);
            Ok(())
        });

        let submitted = runtime.call(
            OperationKind::Transform,
            &[stylesheet.clone(), document, params.clone(), on_output],
        );
        if let Err(error) = submitted {
            sink.borrow_mut().finish(&input, Err(error.to_string()));
        }
        Ok(())
    });

    runtime.call(read, &[Value::from(file), on_document])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_globs_passes_plain_paths_through() {
        let files = expand_globs(&["missing.xml".to_string()]);
        assert_eq!(files, vec!["missing.xml"]);
    }

    #[test]
    fn test_expand_globs_matches_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.xml"), "<a/>").unwrap();
        fs::write(dir.path().join("b.xml"), "<b/>").unwrap();
        fs::write(dir.path().join("c.txt"), "c").unwrap();
        let pattern = format!("{}/*.xml", dir.path().display());
        let mut files = expand_globs(&[pattern]);
        files.sort();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.xml"));
        assert!(files[1].ends_with("b.xml"));
    }

    #[test]
    fn test_output_path_uses_stem() {
        let path = Destination::path_for(Path::new("out"), "data/catalog.xml");
        assert_eq!(path, Path::new("out").join("catalog.out"));
    }

    const GREETING: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:output method="text"/>
  <xsl:param name="who" select="'nobody'"/>
  <xsl:param name="times" select="1"/>
  <xsl:template match="/"><xsl:value-of select="concat(name(*), ' ', $who, ' x', $times)"/></xsl:template>
</xsl:stylesheet>"#;

    fn run_greeting(extra: &[&str]) -> String {
        let dir = tempfile::tempdir().unwrap();
        let stylesheet = dir.path().join("greeting.xslt");
        let input = dir.path().join("doc.xml");
        let out = dir.path().join("out");
        fs::write(&stylesheet, GREETING).unwrap();
        fs::write(&input, "<hi/>").unwrap();

        let mut argv = vec![
            "xsltkit".to_string(),
            "-s".to_string(),
            stylesheet.display().to_string(),
            "-o".to_string(),
            out.display().to_string(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        argv.push(input.display().to_string());

        let report = run(Args::parse_from(argv)).unwrap();
        assert_eq!(report.failed, 0);
        fs::read_to_string(out.join("doc.out")).unwrap()
    }

    #[test]
    fn test_string_param_with_space_sync() {
        let output = run_greeting(&["--sync", "-p", "who", "hello world"]);
        assert_eq!(output, "hi hello world x1");
    }

    #[test]
    fn test_string_param_with_quote_async() {
        let output = run_greeting(&["-p", "who", "it's me", "-x", "times", "2 + 1"]);
        assert_eq!(output, "hi it's me x3");
    }

    #[test]
    fn test_write_failure_counts_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = Sink {
            destination: Destination::Dir(dir.path().join("missing")),
            report: Report::default(),
        };
        sink.finish("a.xml", Ok("x".to_string()));
        sink.finish("b.xml", Err("Failed to parse XML".to_string()));
        assert_eq!(sink.report.failed, 2);
    }
}
