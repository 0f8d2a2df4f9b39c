use arp_conflict::{
    conflict::ConflictAggregator,
    interface::{self, LocalInterface},
    range::AddressRange,
    resolver::{Resolver, ResolverConfigBuilder},
    session::AfPacketSession,
    vendor::{ManufTable, VendorLookup},
};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Sweep an address range with ARP and report IPs claimed by several MAC addresses
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Network interface name to send and receive ARP messages, asked for when omitted
    #[arg(short, long)]
    iface: Option<String>,
    /// First address to query, asked for when omitted
    #[arg(long)]
    start: Option<Ipv4Addr>,
    /// Address at which the sweep stops (not queried), asked for when omitted
    #[arg(long)]
    stop: Option<Ipv4Addr>,
    /// Listening window per address in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
    /// Wireshark manuf file used to name vendors
    #[arg(long)]
    manuf: Option<PathBuf>,
}

fn prompt(input: &mut impl BufRead, output: &mut impl Write, label: &str) -> io::Result<String> {
    write!(output, "-- {}: ", label)?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "input closed before an answer was given"));
    }
    Ok(line.trim().to_string())
}

fn choose_interface(
    input: &mut impl BufRead,
    stdout: &mut impl Write,
) -> Result<LocalInterface, Box<dyn std::error::Error>> {
    let interfaces = interface::available()?;
    writeln!(stdout, "The following devices are available on this machine:")?;
    for (index, iface) in interfaces.iter().enumerate() {
        writeln!(stdout, "{}) {} {} {}/{}", index, iface.name(), iface.description(), iface.ip(), iface.prefix())?;
    }
    loop {
        let answer = prompt(input, stdout, "Please choose a device for sending the ARP requests")?;
        match answer.parse::<usize>().ok().and_then(|index| interfaces.get(index)) {
            Some(iface) => return Ok(iface.clone()),
            None => writeln!(stdout, "Bad device index, please try again")?,
        }
    }
}

fn ask_address(input: &mut impl BufRead, stdout: &mut impl Write, label: &str) -> io::Result<Ipv4Addr> {
    loop {
        match prompt(input, stdout, label)?.parse() {
            Ok(ip) => return Ok(ip),
            Err(_) => writeln!(stdout, "Bad IP address format, please try again")?,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let (interface, range) = {
        let mut stdin = io::stdin().lock();
        let mut stdout = io::stdout().lock();
        let interface = match &args.iface {
            Some(name) => LocalInterface::by_name(name)?,
            None => choose_interface(&mut stdin, &mut stdout)?,
        };
        let start = match args.start {
            Some(start) => start,
            None => ask_address(&mut stdin, &mut stdout, "Please enter start IP address")?,
        };
        let stop = match args.stop {
            Some(stop) => stop,
            None => ask_address(&mut stdin, &mut stdout, "Please enter stop IP address")?,
        };
        (interface, AddressRange::new(start, stop)?)
    };
    let vendors = args.manuf.as_deref().map(ManufTable::from_path).transpose()?;

    let config = ResolverConfigBuilder::new()
        .with_per_target_timeout(Duration::from_millis(args.timeout_ms))
        .build();
    let resolver = Resolver::open(AfPacketSession::new(interface.name()), interface.addrs(), config).await?;
    let local = resolver.local();
    log::info!("sending from {} ({}) on {}", local.ip, local.mac, interface.name());
    let token = resolver.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let mut aggregator = ConflictAggregator::new();
    let result = resolver.scan(&range, &mut aggregator).await;

    let mut stdout = io::stdout().lock();
    match &result {
        Ok(summary) => writeln!(stdout, "Scanned {} addresses, {} replies", summary.targets, summary.bindings)?,
        Err(err) => writeln!(stdout, "Scan stopped early: {}", err)?,
    }
    writeln!(stdout, "Conflicting addresses:")?;
    for (ip, macs) in aggregator.conflicts() {
        writeln!(stdout, "IP:{}", ip)?;
        for mac in macs {
            match vendors.as_ref().and_then(|table| table.organization(*mac)) {
                Some(organization) => writeln!(stdout, "\t{}\t{}", mac, organization)?,
                None => writeln!(stdout, "\t{}", mac)?,
            }
        }
    }
    drop(stdout);
    result?;
    Ok(())
}
