use std::path::PathBuf;

use clap::{builder::FalseyValueParser, ArgAction, Args, Parser, Subcommand};
use piplock_core::{Method, RenderOptions};

#[derive(Parser, Debug)]
#[command(
    name = "piplock",
    author,
    version,
    about = "Install or export Pipfile.lock, poetry.lock and requirements.txt with plain pip",
    disable_help_subcommand = true
)]
pub struct PiplockCli {
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        global = true,
        help = "Increase logging (-v info, -vv debug)"
    )]
    pub verbose: u8,
    #[arg(long, global = true, help = "Force trace logging regardless of -v")]
    pub trace: bool,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandCli {
    /// Install locked dependencies with pip.
    Install(InstallArgs),
    /// Print the lock as a pip requirements file.
    Requirements(RequirementsArgs),
    /// Print or write the lock in normalized Pipfile.lock layout.
    Export(ExportArgs),
    /// Check that Pipfile.lock matches Pipfile and the running interpreter.
    Verify(VerifyArgs),
}

#[derive(Args, Debug, Clone)]
pub struct MethodArgs {
    #[arg(
        long,
        env = "PIPLOCK_METHOD",
        default_value = "auto",
        help = "Lock to read: auto, pipenv, poetry or requirements"
    )]
    pub method: Method,
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    #[command(flatten)]
    pub method: MethodArgs,
    #[arg(
        long,
        env = "PIPLOCK_DEV",
        value_parser = FalseyValueParser::new(),
        help = "Also install dev and named groups"
    )]
    pub dev: bool,
    #[arg(
        long,
        env = "PIPLOCK_DEPLOY",
        value_parser = FalseyValueParser::new(),
        help = "Abort when Pipfile.lock is stale or targets another Python"
    )]
    pub deploy: bool,
    #[arg(last = true, value_name = "PIP_ARGS", help = "Arguments passed through to pip")]
    pub pip_args: Vec<String>,
}

#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct RequirementsArgs {
    #[command(flatten)]
    pub method: MethodArgs,
    #[arg(
        long,
        env = "PIPLOCK_NO_HASHES",
        value_parser = FalseyValueParser::new(),
        help = "Omit --hash lines"
    )]
    pub no_hashes: bool,
    #[arg(
        long,
        env = "PIPLOCK_NO_INDEXES",
        value_parser = FalseyValueParser::new(),
        help = "Omit index directives"
    )]
    pub no_indexes: bool,
    #[arg(
        long,
        env = "PIPLOCK_NO_VERSIONS",
        value_parser = FalseyValueParser::new(),
        help = "Print bare names (implies --no-hashes)"
    )]
    pub no_versions: bool,
    #[arg(
        long,
        env = "PIPLOCK_ONLY_DIRECT",
        value_parser = FalseyValueParser::new(),
        help = "Only dependencies declared in Pipfile or pyproject.toml"
    )]
    pub only_direct: bool,
    #[arg(
        long,
        env = "PIPLOCK_NO_COMMENTS",
        value_parser = FalseyValueParser::new(),
        help = "Omit group banners and index comments"
    )]
    pub no_comments: bool,
    #[arg(
        long,
        env = "PIPLOCK_NO_DEFAULT",
        value_parser = FalseyValueParser::new(),
        help = "Exclude default dependencies"
    )]
    pub no_default: bool,
    #[arg(
        long,
        env = "PIPLOCK_NO_DEV",
        value_parser = FalseyValueParser::new(),
        help = "Exclude dev and named groups"
    )]
    pub no_dev: bool,
}

impl RequirementsArgs {
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            no_hashes: self.no_hashes,
            no_versions: self.no_versions,
            no_indexes: self.no_indexes,
            no_comments: self.no_comments,
            no_default: self.no_default,
            no_dev: self.no_dev,
            only_direct: self.only_direct,
        }
    }
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(flatten)]
    pub method: MethodArgs,
    #[arg(short, long, value_name = "PATH", help = "Write to PATH instead of stdout")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub method: MethodArgs,
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, MutexGuard, PoisonError};

    use super::*;
    use clap::CommandFactory;
    use piplock_core::LockFormat;

    const FLAG_VARS: [&str; 9] = [
        "PIPLOCK_DEV",
        "PIPLOCK_DEPLOY",
        "PIPLOCK_NO_HASHES",
        "PIPLOCK_NO_INDEXES",
        "PIPLOCK_NO_VERSIONS",
        "PIPLOCK_ONLY_DIRECT",
        "PIPLOCK_NO_COMMENTS",
        "PIPLOCK_NO_DEFAULT",
        "PIPLOCK_NO_DEV",
    ];

    // Parsing reads the process environment, so tests that parse take turns.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_guard() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[test]
    fn cli_definition_is_consistent() {
        PiplockCli::command().debug_assert();
    }

    #[test]
    fn install_collects_pip_args_after_separator() {
        let _guard = env_guard();
        let cli = PiplockCli::parse_from([
            "piplock", "install", "--dev", "--method", "poetry", "--", "--user", "-q",
        ]);
        let CommandCli::Install(args) = cli.command else {
            panic!("expected install");
        };
        assert!(args.dev);
        assert_eq!(args.method.method, Method::Format(LockFormat::Poetry));
        assert_eq!(args.pip_args, vec!["--user", "-q"]);
    }

    #[test]
    fn requirements_flags_map_to_render_options() {
        let _guard = env_guard();
        let cli = PiplockCli::parse_from(["piplock", "-vv", "requirements", "--no-hashes", "--no-dev"]);
        assert_eq!(cli.verbose, 2);
        let CommandCli::Requirements(args) = cli.command else {
            panic!("expected requirements");
        };
        let options = args.render_options();
        assert!(options.no_hashes && options.no_dev);
        assert!(!options.no_default && !options.only_direct);
    }

    #[test]
    fn flag_variables_accept_one_and_zero() {
        let _guard = env_guard();
        for var in FLAG_VARS {
            std::env::set_var(var, "1");
        }
        let requirements = PiplockCli::try_parse_from(["piplock", "requirements"]);
        let install = PiplockCli::try_parse_from(["piplock", "install"]);
        std::env::set_var("PIPLOCK_NO_DEV", "0");
        let disabled = PiplockCli::try_parse_from(["piplock", "requirements"]);
        for var in FLAG_VARS {
            std::env::remove_var(var);
        }

        let CommandCli::Requirements(args) = requirements.expect("parse requirements").command else {
            panic!("expected requirements");
        };
        let options = args.render_options();
        assert!(options.no_hashes && options.no_indexes && options.no_versions);
        assert!(options.only_direct && options.no_comments);
        assert!(options.no_default && options.no_dev);

        let CommandCli::Install(args) = install.expect("parse install").command else {
            panic!("expected install");
        };
        assert!(args.dev && args.deploy);

        let CommandCli::Requirements(args) = disabled.expect("parse requirements").command else {
            panic!("expected requirements");
        };
        assert!(!args.no_dev);
        assert!(args.no_default);
    }
}
