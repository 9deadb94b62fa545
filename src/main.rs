use anyhow::{Context as _, Result};

#[derive(Clone, Copy, Debug)]
enum Query {
    Info,
    Ppid,
    Args,
}

impl Query {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "info" => Some(Query::Info),
            "ppid" => Some(Query::Ppid),
            "args" => Some(Query::Args),
            _ => None,
        }
    }
}

fn usage(program: &str) {
    eprintln!("Usage: {program} <pid> [info|ppid|args]");
    eprintln!();
    eprintln!("Print the kernel's record of a process: its parent pid and command name (info),");
    eprintln!("just the parent pid (ppid), or the path, arguments and environment it was");
    eprintln!("started with (args, the default).");
}

#[cfg(target_vendor = "apple")]
fn run(pid: libc::pid_t, query: Query) -> Result<()> {
    match query {
        Query::Info => {
            let info = kern_proc::fetch_info(pid)?;
            println!("pid\t{}", info.pid());
            println!("ppid\t{}", info.ppid());
            println!("command\t{}", info.command());
        }
        Query::Ppid => println!("{}", kern_proc::fetch_ppid(pid)?),
        Query::Args => {
            let args = kern_proc::fetch_args(pid)?;
            println!("path\t{}", args.path);
            for (i, arg) in args.args.iter().enumerate() {
                println!("arg[{i}]\t{arg}");
            }
            for (key, value) in &args.env {
                println!("env\t{key}={value}");
            }
        }
    }
    Ok(())
}

#[cfg(not(target_vendor = "apple"))]
fn run(_pid: libc::pid_t, _query: Query) -> Result<()> {
    Err(anyhow::anyhow!(
        "unsupported platform: the process table is read through Darwin sysctls"
    ))
}

fn main() -> Result<()> {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("kern-proc");
    if !(2..=3).contains(&args.len()) {
        usage(program);
        return Ok(());
    }
    let pid: libc::pid_t = args[1]
        .parse()
        .with_context(|| format!("Invalid pid {:?}", args[1]))?;
    let Some(query) = Query::parse(args.get(2).map(String::as_str).unwrap_or("args")) else {
        usage(program);
        return Ok(());
    };
    log::debug!("Querying {query:?} of pid {pid}");
    run(pid, query)
}
