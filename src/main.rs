use healer_stress::{
    boot, config::Config, fuzz::features::FEATURES_HELP, setup_signal_handler, utils::StopToken,
};
use simplelog::{ColorChoice, LevelFilter, TermLogger, TerminalMode};
use std::{path::PathBuf, time::Duration};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "healer-stress",
    about = "Keep generating, mutating and executing syscall progs.",
    after_help = FEATURES_HELP.as_str()
)]
struct Settings {
    /// Target os, default is the host os.
    #[structopt(long)]
    os: Option<String>,
    /// Target arch, default is the host arch.
    #[structopt(long)]
    arch: Option<String>,
    /// Corpus directory or file.
    #[structopt(long)]
    corpus: Option<PathBuf>,
    /// Print executor output of every execution.
    #[structopt(long)]
    output: bool,
    /// Number of parallel workers, default is twice the number of cpus.
    #[structopt(long)]
    procs: Option<u64>,
    /// Print programs before execution.
    #[structopt(long = "logprog")]
    log_prog: bool,
    /// Generate new programs, otherwise only mutate corpus.
    #[structopt(long, parse(try_from_str), default_value = "true")]
    generate: bool,
    /// Comma separated list of enabled syscalls, e.g. 'open,read$*,socket*'.
    #[structopt(long, use_delimiter = true)]
    syscalls: Vec<String>,
    /// Enable only listed additional features.
    #[structopt(long, default_value = "none")]
    enable: String,
    /// Enable all additional features except listed.
    #[structopt(long, default_value = "none")]
    disable: String,
    /// Directory of extra target descriptions, '<os>_<arch>.json'.
    #[structopt(long)]
    sys_dir: Option<PathBuf>,
    /// Path to executor.
    #[structopt(long, default_value = "./syz-executor")]
    executor: PathBuf,
    /// Comma separated arguments passed to executor before 'exec'.
    #[structopt(long, use_delimiter = true, allow_hyphen_values = true)]
    executor_args: Vec<String>,
    /// Kill programs running longer than this, in seconds.
    #[structopt(long, default_value = "10")]
    timeout: u64,
    /// Log level: off, error, warn, info, debug or trace.
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() {
    let settings = Settings::from_args();
    if let Err(e) = TermLogger::init(
        settings.log_level,
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("failed to init logger: {}", e);
    }

    let default = Config::default();
    let config = Config {
        os: settings.os.unwrap_or(default.os),
        arch: settings.arch.unwrap_or(default.arch),
        corpus: settings.corpus,
        output: settings.output,
        procs: settings.procs.unwrap_or(default.procs),
        log_prog: settings.log_prog,
        generate: settings.generate,
        syscalls: settings.syscalls,
        enable: settings.enable,
        disable: settings.disable,
        sys_dir: settings.sys_dir,
        executor: settings.executor,
        executor_args: settings.executor_args,
        timeout: Duration::from_secs(settings.timeout),
    };

    let stop = StopToken::new();
    if let Err(e) = setup_signal_handler(stop.clone()) {
        log::warn!("failed to setup signal handler: {}", e);
    }
    if let Err(e) = boot(config, stop) {
        log::error!("{:?}", e);
        std::process::exit(1);
    }
}
