// extern crates
#[macro_use]
extern crate log;

use clap::{App, Arg};
use log::LevelFilter;

// Rust stdlib
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

// modules
mod literal;
pub use self::literal::Literal;

mod dimacs;
pub use dimacs::*;

pub mod hoist;
pub mod kernel;
pub mod level;
pub mod mbp;
pub mod model;
pub mod parse;
pub mod term;
pub mod utils;

pub mod solve;
pub use solve::qsat::{QsatOptions, QsatOutcome, QsatSolver};
pub use solve::{Failure, FailureReason, SolverResult};

use model::Model;
use term::{format_rational, Sort, Term, TermStore};

#[cfg(feature = "statistics")]
use utils::statistics::TimingStats;

// Command line parsing

pub type QsatConfig = CommonSolverConfig<QsatSpecificSolverConfig>;

pub trait SolverSpecificConfig {
    fn add_arguments<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b>;
    fn parse_arguments(matches: &clap::ArgMatches) -> Self;
    const NAME: &'static str;
    const DESC: &'static str;
}

#[derive(Debug)]
pub struct CommonSolverConfig<T: SolverSpecificConfig> {
    /// None for stdin
    filename: Option<String>,
    verbosity: LevelFilter,
    statistics: bool,
    specific: T,
}

impl<T: SolverSpecificConfig> CommonSolverConfig<T> {
    pub fn new(args: &[String]) -> Self {
        let mut flags = App::new(T::NAME)
            .version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
            .about(T::DESC)
            .arg(
                Arg::with_name("INPUT")
                    .help("Sets the input file to use")
                    .required(false)
                    .index(1),
            )
            .arg(
                Arg::with_name("v")
                    .short("v")
                    .multiple(true)
                    .help("Sets the level of verbosity"),
            )
            .arg(
                Arg::with_name("statistics")
                    .long("--statistics")
                    .help("Enables collection and printing of solving statistics"),
            );
        flags = T::add_arguments(flags);

        let matches = flags.get_matches_from(args);

        let filename = matches.value_of("INPUT").map(|s| s.to_string());

        let verbosity = match matches.occurrences_of("v") {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let statistics = matches.is_present("statistics");

        CommonSolverConfig {
            filename,
            verbosity,
            statistics,
            specific: T::parse_arguments(&matches),
        }
    }

    fn init_logging(&self) {
        let result = env_logger::Builder::new()
            .filter_level(self.verbosity)
            .format_timestamp(None)
            .try_init();
        if result.is_err() {
            debug!("logger was initialized before");
        }
    }

    fn read_input(&self) -> Result<String, Box<dyn Error>> {
        let mut contents = String::new();
        match &self.filename {
            Some(filename) => {
                let mut file = File::open(filename)?;
                file.read_to_string(&mut contents)?;
            }
            None => {
                std::io::stdin().read_to_string(&mut contents)?;
            }
        }
        Ok(contents)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Qdimacs,
    Smt2,
}

impl InputFormat {
    pub fn values() -> &'static [&'static str] {
        &["qdimacs", "smt2"]
    }

    /// Guesses the format from the file extension, QDIMACS is the default.
    pub fn from_filename(filename: Option<&str>) -> InputFormat {
        match filename
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
        {
            Some("smt2") | Some("smt") => InputFormat::Smt2,
            _ => InputFormat::Qdimacs,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownFormatError(String);

impl fmt::Display for UnknownFormatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown input format `{}`", self.0)
    }
}

impl Error for UnknownFormatError {}

impl FromStr for InputFormat {
    type Err = UnknownFormatError;

    fn from_str(s: &str) -> Result<InputFormat, UnknownFormatError> {
        match s {
            "qdimacs" => Ok(InputFormat::Qdimacs),
            "smt2" => Ok(InputFormat::Smt2),
            _ => Err(UnknownFormatError(s.to_string())),
        }
    }
}

#[derive(Debug)]
pub struct QsatSpecificSolverConfig {
    pub format: Option<InputFormat>,
    pub qdimacs_output: bool,
    /// JSON file with `QsatOptions`, command line flags take precedence
    pub options_file: Option<String>,
    pub eliminate: bool,
    pub recursive_elimination: bool,
    pub validate: Option<bool>,
}

impl SolverSpecificConfig for QsatSpecificSolverConfig {
    const NAME: &'static str = "qsat";
    const DESC: &'static str = "qsat decides and eliminates quantifiers of formulas over booleans \
         and linear real arithmetic, given in QDIMACS or SMT-LIB format.";

    fn add_arguments<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
        app.arg(
            Arg::with_name("format")
                .help("Sets the input format, defaults to the file extension")
                .long("--format")
                .takes_value(true)
                .possible_values(InputFormat::values()),
        )
        .arg(
            Arg::with_name("qdimacs-output")
                .long("--qdo")
                .help("Prints QDIMACS output (partial assignment) after solving"),
        )
        .arg(
            Arg::with_name("options")
                .long("--options")
                .value_name("FILE")
                .takes_value(true)
                .help("Reads solver options from a JSON file"),
        )
        .arg(
            Arg::with_name("qe")
                .long("--qe")
                .help("Computes a quantifier-free equivalent instead of deciding the formula"),
        )
        .arg(
            Arg::with_name("qe-rec")
                .long("--qe-rec")
                .conflicts_with("qe")
                .help("Like --qe, but eliminates nested quantifiers innermost first"),
        )
        .arg(
            Arg::with_name("validate")
                .long("--validate")
                .value_name("bool")
                .takes_value(true)
                .possible_values(&["0", "1"])
                .hide_possible_values(true)
                .help("Controls whether models, cores and projections are checked"),
        )
    }

    fn parse_arguments(matches: &clap::ArgMatches) -> Self {
        // possible values are restricted by clap
        let format = matches
            .value_of("format")
            .and_then(|s| InputFormat::from_str(s).ok());
        QsatSpecificSolverConfig {
            format,
            qdimacs_output: matches.is_present("qdimacs-output"),
            options_file: matches.value_of("options").map(|s| s.to_string()),
            eliminate: matches.is_present("qe") || matches.is_present("qe-rec"),
            recursive_elimination: matches.is_present("qe-rec"),
            validate: matches.value_of("validate").map(|v| v == "1"),
        }
    }
}

impl QsatSpecificSolverConfig {
    /// The options of the options file, or the defaults, overridden by the
    /// command line flags.
    pub fn options(&self) -> Result<QsatOptions, Box<dyn Error>> {
        let mut options = match &self.options_file {
            Some(filename) => serde_json::from_reader(File::open(filename)?)?,
            None => QsatOptions::default(),
        };
        if self.eliminate {
            options.eliminate = true;
            options.force_elimination = !self.recursive_elimination;
        }
        if let Some(validate) = self.validate {
            options.validate = validate;
        }
        Ok(options)
    }
}

#[cfg(feature = "statistics")]
#[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy, Debug)]
enum SolverPhases {
    Parsing,
    Solving,
}

#[cfg(feature = "statistics")]
impl fmt::Display for SolverPhases {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SolverPhases::Parsing => write!(f, "parsing"),
            SolverPhases::Solving => write!(f, "solving"),
        }
    }
}

/// Renders a model as SMT-LIB `define-fun` commands, sorted by name.
pub fn smt2_model(store: &TermStore, model: &Model) -> String {
    let mut definitions: Vec<String> = model
        .variables()
        .into_iter()
        .filter_map(|var| {
            let name = store.var_name(var)?;
            let value = match store.sort(var) {
                Sort::Bool => model.bool_value(var)?.to_string(),
                Sort::Real => format_rational(model.real_value(var)?),
            };
            Some(format!(
                "  (define-fun {} () {} {})",
                name,
                store.sort(var),
                value
            ))
        })
        .collect();
    definitions.sort();
    let mut result = String::from("(model\n");
    for definition in definitions {
        result.push_str(&definition);
        result.push('\n');
    }
    result.push(')');
    result
}

impl QsatConfig {
    pub fn run(&self) -> Result<SolverResult, Box<dyn Error>> {
        self.init_logging();

        let options = self.specific.options()?;
        let format = self
            .specific
            .format
            .unwrap_or_else(|| InputFormat::from_filename(self.filename.as_deref()));
        info!("{:?} input, options {:?}", format, options);

        #[cfg(feature = "statistics")]
        let statistics = TimingStats::new();

        #[cfg(feature = "statistics")]
        let mut timer = statistics.start(SolverPhases::Parsing);

        let contents = self.read_input()?;
        let mut store = TermStore::new();
        let (fml, qdimacs) = match format {
            InputFormat::Qdimacs => {
                let instance = parse::qdimacs::parse(&contents)?;
                let encoding = instance.to_term(&mut store);
                (encoding.formula, Some((instance, encoding)))
            }
            InputFormat::Smt2 => {
                let script = parse::smt2::parse(&mut store, &contents)?;
                (script.formula(&mut store), None)
            }
        };
        debug!("formula {}", store.display(fml));

        #[cfg(feature = "statistics")]
        timer.stop();

        #[cfg(feature = "statistics")]
        let mut timer = statistics.start(SolverPhases::Solving);

        let mut solver = QsatSolver::new(options);
        let outcome = solver.check(&mut store, fml)?;

        #[cfg(feature = "statistics")]
        timer.stop();

        if self.statistics {
            #[cfg(feature = "statistics")]
            print!("{}", statistics);
            print!("{}", solver.statistics());
            print!("{}", solver.exists_kernel().statistics());
        }

        if let QsatOutcome::Unknown(failure) = &outcome {
            warn!("{}", failure);
        }
        if let Some(answer) = outcome.answer() {
            println!("{}", store.display(answer));
        }
        match qdimacs {
            Some((instance, encoding)) => {
                if self.specific.qdimacs_output {
                    print!("{}", instance.certificate(&outcome, &encoding).dimacs());
                }
            }
            None => {
                if !options.eliminate {
                    println!("{}", smt2_status(outcome.result()));
                }
                if let Some(model) = outcome.external_model() {
                    println!("{}", smt2_model(&store, &model));
                }
            }
        }

        Ok(outcome.result())
    }
}

fn smt2_status(result: SolverResult) -> &'static str {
    match result {
        SolverResult::Satisfiable => "sat",
        SolverResult::Unsatisfiable => "unsat",
        SolverResult::Unknown => "unknown",
    }
}

/// Convenience entry point for library users: decides `fml` with default
/// options.
pub fn check(store: &mut TermStore, fml: Term) -> Result<QsatOutcome, solve::validate::ValidationError> {
    QsatSolver::new(QsatOptions::default()).check(store, fml)
}
