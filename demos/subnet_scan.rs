use arp_conflict::{
    binding::ResolvedBinding,
    interface::LocalInterface,
    range::AddressRange,
    resolver::{Resolver, ResolverConfigBuilder},
    session::AfPacketSession,
};
use clap::Parser;
use ipnet::Ipv4Net;
use std::io::Write;
use std::time::{Duration, Instant};

/// Resolve every address of the interface's own subnet and list what answered
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Network interface name to send and receive ARP messages
    #[arg(short, long)]
    iface: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt().init();
    let args = Args::parse();
    let interface = LocalInterface::by_name(&args.iface).unwrap();
    let net = Ipv4Net::new(interface.ip(), interface.prefix()).unwrap().trunc();
    let range = AddressRange::new(net.network(), net.broadcast()).unwrap();

    let resolver = Resolver::open(
        AfPacketSession::new(interface.name()),
        interface.addrs(),
        ResolverConfigBuilder::new()
            .with_per_target_timeout(Duration::from_millis(200))
            .build(),
    )
    .await
    .unwrap();

    let (mut tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ResolvedBinding>();
    let start = Instant::now();
    let summary = resolver.scan(&range, &mut tx).await.unwrap();
    drop(tx);

    {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "Found hosts:").unwrap();
        while let Some(binding) = rx.recv().await {
            writeln!(stdout, "{} {}", binding.ip, binding.mac).unwrap();
        }
        writeln!(stdout, "{:?}", summary).unwrap();
        writeln!(stdout, "Scan took {:?}", start.elapsed()).unwrap();
    }
}
