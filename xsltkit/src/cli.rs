//! CLI argument parsing using clap

use clap::Parser;

/// Parse XML or HTML files and apply an XSLT 1.0 stylesheet
#[derive(Parser, Debug)]
#[command(name = "xsltkit")]
#[command(author, about, long_about = None)]
#[command(disable_version_flag = true)]
#[command(after_help = r#"EXAMPLES:
    # Render a catalog to HTML
    xsltkit -s catalog.xslt data/catalog.xml

    # Pass stylesheet parameters (-p values are strings, -x values are XPath)
    xsltkit -s report.xslt -p title "Q3 report" -x limit 10 "data/*.xml"

    # Scrape HTML pages, one output file per input
    xsltkit -s links.xslt --html -o out/ "pages/**/*.html"

    # Show library versions and the worker pool configuration
    xsltkit --version --verbose
"#)]
pub struct Args {
    /// Files to transform (supports glob patterns like "data/**/*.xml")
    #[arg()]
    pub files: Vec<String>,

    /// XSLT stylesheet to apply
    #[arg(short = 's', long = "stylesheet", value_name = "FILE")]
    pub stylesheet: Option<String>,

    /// Stylesheet parameter, passed as a string (repeatable)
    #[arg(short = 'p', long = "param", num_args = 2, value_names = ["NAME", "VALUE"], action = clap::ArgAction::Append)]
    pub params: Vec<String>,

    /// Stylesheet parameter, passed as an XPath expression (repeatable)
    #[arg(short = 'x', long = "xpath-param", num_args = 2, value_names = ["NAME", "EXPR"], action = clap::ArgAction::Append)]
    pub xpath_params: Vec<String>,

    /// Parse input files as HTML instead of XML
    #[arg(long = "html")]
    pub html: bool,

    /// Number of worker threads (default: XSLTKIT_THREADS, else the number of CPUs)
    #[arg(short = 'c', long = "concurrency")]
    pub concurrency: Option<usize>,

    /// Write each result to DIR/<stem>.out instead of stdout
    #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<String>,

    /// Run every operation on the calling thread
    #[arg(long = "sync")]
    pub sync: bool,

    /// Show verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Print version information (add --verbose for details)
    #[arg(short = 'V', long = "version")]
    pub version: bool,
}

impl Args {
    /// Stylesheet parameters as (name, XPath expression) pairs
    pub fn param_pairs(&self) -> Vec<(String, String)> {
        let strings = self
            .params
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), string_literal(&pair[1])));
        let expressions = self
            .xpath_params
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()));
        strings.chain(expressions).collect()
    }
}

/// Quote `value` as an XPath string literal
pub fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
