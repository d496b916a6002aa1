//! sicoc: compiles kernel files ahead of time so build systems catch kernel errors early.
//!
//! The program is built for the selected device and the build log is printed.
//! With `-o`, an empty marker file is written after a successful build.

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::Parser;
use log::{debug, info};
use sico::{check_file, ComputeRegistry, Config, DeviceSelector, Runtime};

#[derive(Parser, Debug)]
#[command(name = "sicoc")]
#[command(about = "SICOC - Si(mple) Co(mpute) Compiler", long_about = None)]
#[command(version)]
struct Cli {
    /// Kernel source file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Dummy output file written on success, for build systems to track
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Print what the compiler does behind the scenes
    #[arg(long)]
    verbose: bool,

    /// Suppress the header
    #[arg(long)]
    noheader: bool,

    /// Zero based platform index to select
    #[arg(long, value_name = "IDX")]
    platform_index: Option<usize>,

    /// Zero based device index (within the platform) to select
    #[arg(long, value_name = "IDX")]
    device_index: Option<usize>,

    /// Substring to match when selecting the platform by name
    #[arg(long, value_name = "SUBSTR")]
    platform_substr: Option<String>,

    /// Substring to match when selecting the device by name
    #[arg(long, value_name = "SUBSTR")]
    device_substr: Option<String>,

    /// Options passed through to the kernel build
    #[arg(last = true, allow_hyphen_values = true)]
    build_options: Vec<String>,
}

impl Cli {
    fn selector(&self) -> DeviceSelector {
        DeviceSelector {
            platform_index: self.platform_index,
            platform_substr: self.platform_substr.clone(),
            device_index: self.device_index,
            device_substr: self.device_substr.clone(),
        }
    }

    /// Passed through options, configured defaults and the include path of the input.
    fn build_options(&self, config: &Config) -> String {
        let mut options = self.build_options.clone();
        if !config.build_options.is_empty() {
            options.insert(0, config.build_options.clone());
        }

        let dir = self
            .input
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        options.push(format!("-I \"{}\"", dir.display()));
        options.join(" ")
    }
}

#[cfg(feature = "opencl")]
fn runtime() -> sico::devices::opencl::OpenClRuntime {
    sico::devices::opencl::OpenClRuntime::new()
}

#[cfg(not(feature = "opencl"))]
fn runtime() -> sico::devices::host::HostRuntime {
    use sico::devices::host::{HostDevice, HostRuntime};

    HostRuntime::builder()
        .platform("sico host", [HostDevice::cpu("Host CPU")])
        .syntax_only()
        .build()
}

fn compile<R: Runtime>(cli: &Cli, registry: &ComputeRegistry<R>) -> sico::Result<String> {
    let config = Config::from_env()?;
    let selector = cli.selector();

    let device = if selector.is_empty() {
        registry.select_configured_device(&config)?
    } else {
        registry.select_device(&selector)?
    };
    info!("compiling {} for {}", cli.input.display(), device.name());

    let options = cli.build_options(&config);
    debug!("build options: {options}");
    check_file(registry, device, &cli.input, &options)
}

fn write_output(path: &Path) {
    let _ = std::fs::remove_file(path);
    if std::fs::File::create(path).is_err() {
        eprintln!("SICOC: Unable to open {} for write", path.display());
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "warn" }),
    )
    .init();

    if !cli.noheader {
        println!("SICOC - Si(mple) Co(mpute) Compiler");
    }

    let registry = match ComputeRegistry::open(runtime()) {
        Ok(registry) => registry,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let result = compile(&cli, &registry);
    let code = match result {
        Ok(log) => {
            if !log.trim().is_empty() {
                println!("{log}");
            }
            if let Some(output) = &cli.output {
                write_output(output);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            // Display of a build error carries the full build log
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    };

    if let Err(err) = registry.close() {
        eprintln!("{err}");
    }
    code
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::Parser;
    use sico::Config;

    #[test]
    fn test_build_options_pass_through() {
        let cli = Cli::parse_from([
            "sicoc",
            "kernels/add.cl",
            "--device-substr",
            "gpu",
            "--",
            "-D",
            "N=4",
            "-cl-fast-relaxed-math",
        ]);
        assert_eq!(cli.device_substr.as_deref(), Some("gpu"));
        assert!(!cli.selector().is_empty());

        let config = Config {
            build_options: "-w".into(),
            ..Default::default()
        };
        assert_eq!(
            cli.build_options(&config),
            "-w -D N=4 -cl-fast-relaxed-math -I \"kernels\""
        );
    }

    #[test]
    fn test_include_dir_of_bare_file() {
        let cli = Cli::parse_from(["sicoc", "add.cl", "-o", "add.stamp"]);
        assert!(cli.selector().is_empty());
        assert_eq!(cli.build_options(&Config::default()), "-I \".\"");
    }
}
