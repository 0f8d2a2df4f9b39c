use std::{net::Ipv4Addr, time::Duration};

use pnet::packet::arp::ArpOperations;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    binding::{BindingSink, ResolvedBinding},
    error::{Error, Result},
    frame::{parse_arp_frame, RequestFrame},
    session::{CaptureFilter, LocalAddrs, Session},
};

// Keeps a zero resend interval from spinning without ever yielding to the timer.
const MIN_POLL_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// How long each target is queried and listened for.
    pub per_target_timeout: Duration,
    /// Minimum spacing between two requests for the same target.
    pub resend_interval: Duration,
    /// Upper bound of a single receive attempt.
    pub poll_timeout: Duration,
    pub cancellation: CancellationToken,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfigBuilder::new().build()
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfigBuilder {
    per_target_timeout: Duration,
    resend_interval: Duration,
    poll_timeout: Duration,
    cancellation: Option<CancellationToken>,
}

impl Default for ResolverConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverConfigBuilder {
    pub fn new() -> Self {
        Self {
            per_target_timeout: Duration::from_secs(1),
            resend_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_millis(20),
            cancellation: None,
        }
    }

    pub fn with_per_target_timeout(mut self, timeout: Duration) -> Self {
        self.per_target_timeout = timeout;
        self
    }

    pub fn with_resend_interval(mut self, interval: Duration) -> Self {
        self.resend_interval = interval;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Token that stops the scan when cancelled. A fresh one is created otherwise.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn build(self) -> ResolverConfig {
        ResolverConfig {
            per_target_timeout: self.per_target_timeout,
            resend_interval: self.resend_interval,
            poll_timeout: self.poll_timeout,
            cancellation: self.cancellation.unwrap_or_else(CancellationToken::new),
        }
    }
}

/// Counters of a completed scan.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct ScanSummary {
    pub targets: usize,
    pub requests_sent: usize,
    pub bindings: usize,
    /// Captured frames that were malformed, not replies, or answered for another address.
    pub discarded: usize,
}

/// Sweeps targets one at a time over a single owned [`Session`].
///
/// Each target gets a fixed window of `per_target_timeout`. Within it the
/// request is resent every `resend_interval` and the session is polled for
/// replies. Every reply whose sender address is the target being queried is
/// emitted as a [`ResolvedBinding`]; the window always runs to its end, so one
/// target can produce several bindings.
///
/// The capture filter spans the whole scan. A reply for any other address that
/// lands in the current window is dropped, even if that address is queried
/// later or was queried earlier.
///
/// # Example
/// ```no_run
/// use arp_conflict::{
///     conflict::ConflictAggregator,
///     interface::LocalInterface,
///     range::AddressRange,
///     resolver::{Resolver, ResolverConfig},
///     session::AfPacketSession,
/// };
/// use std::net::Ipv4Addr;
///
/// tokio_test::block_on(async {
///     let interface = LocalInterface::by_name("eth0").unwrap();
///     let range = AddressRange::new(Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(192, 168, 1, 64)).unwrap();
///     let resolver = Resolver::open(
///         AfPacketSession::new(interface.name()),
///         interface.addrs(),
///         ResolverConfig::default(),
///     )
///     .await
///     .unwrap();
///
///     let mut aggregator = ConflictAggregator::new();
///     resolver.scan(&range, &mut aggregator).await.unwrap();
///     for (ip, macs) in aggregator.conflicts() {
///         println!("{} is claimed by {:?}", ip, macs);
///     }
/// })
/// ```
#[derive(Debug)]
pub struct Resolver<S> {
    session: S,
    local: LocalAddrs,
    config: ResolverConfig,
}

impl<S: Session> Resolver<S> {
    /// Opens `session` with a filter for ARP frames sent to `local.mac`.
    ///
    /// # Errors
    /// Returns [`Error::Resource`] if the session cannot be opened.
    pub async fn open(mut session: S, local: LocalAddrs, config: ResolverConfig) -> Result<Self> {
        session.open(CaptureFilter::for_mac(local.mac)).await?;
        Ok(Self {
            session,
            local,
            config,
        })
    }

    pub fn local(&self) -> LocalAddrs {
        self.local
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.config.cancellation.clone()
    }

    /// Queries every target in order and hands matching replies to `sink`.
    ///
    /// The session is closed exactly once before this returns, whatever the
    /// outcome. Bindings emitted before a failure stay in `sink`.
    ///
    /// # Errors
    /// [`Error::Transmission`] if a request cannot be sent, [`Error::Resource`]
    /// if reading from or closing the session fails and [`Error::Cancelled`] if
    /// the cancellation token fires. Malformed frames are skipped.
    pub async fn scan<I, K>(mut self, targets: I, sink: &mut K) -> Result<ScanSummary>
    where
        I: IntoIterator<Item = Ipv4Addr>,
        K: BindingSink + ?Sized,
    {
        let result = self.run(targets, sink).await;
        let closed = self.session.close().await;
        match (result, closed) {
            (Ok(summary), Ok(())) => {
                log::info!(
                    "scan finished: {} targets, {} requests, {} bindings, {} frames discarded",
                    summary.targets,
                    summary.requests_sent,
                    summary.bindings,
                    summary.discarded
                );
                Ok(summary)
            }
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                log::warn!("failed to close session after aborted scan: {}", close_err);
                Err(err)
            }
        }
    }

    async fn run<I, K>(&mut self, targets: I, sink: &mut K) -> Result<ScanSummary>
    where
        I: IntoIterator<Item = Ipv4Addr>,
        K: BindingSink + ?Sized,
    {
        let mut summary = ScanSummary::default();
        for target in targets {
            self.resolve(target, sink, &mut summary).await?;
            summary.targets += 1;
        }
        Ok(summary)
    }

    async fn resolve<K>(
        &mut self,
        target: Ipv4Addr,
        sink: &mut K,
        summary: &mut ScanSummary,
    ) -> Result<()>
    where
        K: BindingSink + ?Sized,
    {
        let request = RequestFrame::build(target, self.local.mac, self.local.ip);
        let window_end = Instant::now() + self.config.per_target_timeout;
        let mut last_send: Option<Instant> = None;
        log::debug!("resolving {} for {:?}", target, self.config.per_target_timeout);

        while Instant::now() < window_end {
            if self.config.cancellation.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if last_send.map_or(true, |sent| sent.elapsed() >= self.config.resend_interval) {
                self.session
                    .send(request.as_bytes())
                    .await
                    .map_err(Error::Transmission)?;
                last_send = Some(Instant::now());
                summary.requests_sent += 1;
            }

            // wake up in time for the next resend and for the end of the window
            let resend_due = last_send.map_or(window_end, |sent| sent + self.config.resend_interval);
            let wake_at = (Instant::now() + self.config.poll_timeout)
                .min(resend_due)
                .min(window_end);
            let wait = wake_at
                .saturating_duration_since(Instant::now())
                .max(MIN_POLL_WAIT);
            let Some(frame) = self.session.try_receive(wait).await? else {
                continue;
            };
            let arp = match parse_arp_frame(&frame) {
                Ok(arp) => arp,
                Err(err) => {
                    log::trace!("discarding frame while resolving {}: {}", target, err);
                    summary.discarded += 1;
                    continue;
                }
            };
            if arp.operation != ArpOperations::Reply || arp.sender_proto_addr != target {
                log::trace!(
                    "discarding ARP from {} ({}) while resolving {}",
                    arp.sender_proto_addr,
                    arp.sender_hw_addr,
                    target
                );
                summary.discarded += 1;
                continue;
            }
            log::debug!("{} is at {}", arp.sender_proto_addr, arp.sender_hw_addr);
            sink.emit(ResolvedBinding::new(arp.sender_proto_addr, arp.sender_hw_addr));
            summary.bindings += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        io,
        sync::{Arc, Mutex},
    };

    use pnet::{
        packet::arp::{ArpOperation, ArpOperations},
        util::MacAddr,
    };

    use super::*;
    use crate::{conflict::ConflictAggregator, frame::build_arp_frame, range::AddressRange};

    const LOCAL: LocalAddrs = LocalAddrs {
        ip: Ipv4Addr::new(10, 0, 0, 100),
        mac: MacAddr(0x02, 0x00, 0x00, 0x00, 0x00, 0x64),
    };
    const MAC_A: MacAddr = MacAddr(0x00, 0x11, 0x22, 0x33, 0x44, 0x55);
    const MAC_B: MacAddr = MacAddr(0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB);

    #[derive(Debug, Default)]
    struct SessionLog {
        filter: Option<CaptureFilter>,
        // offsets from `open` at which each frame was sent, with the requested target
        sends: Vec<(Duration, Ipv4Addr)>,
        closes: usize,
    }

    /// Replays frames at fixed offsets from the moment the session was opened.
    struct ScriptedSession {
        log: Arc<Mutex<SessionLog>>,
        script: VecDeque<(Duration, Vec<u8>)>,
        opened_at: Option<Instant>,
        fail_on_send: Option<usize>,
        fail_on_close: bool,
    }

    impl ScriptedSession {
        fn new(script: Vec<(Duration, Vec<u8>)>) -> (Self, Arc<Mutex<SessionLog>>) {
            let log = Arc::new(Mutex::new(SessionLog::default()));
            let session = Self {
                log: Arc::clone(&log),
                script: script.into(),
                opened_at: None,
                fail_on_send: None,
                fail_on_close: false,
            };
            (session, log)
        }

        fn failing_on_send(mut self, nth: usize) -> Self {
            self.fail_on_send = Some(nth);
            self
        }

        fn failing_on_close(mut self) -> Self {
            self.fail_on_close = true;
            self
        }
    }

    impl Session for ScriptedSession {
        async fn open(&mut self, filter: CaptureFilter) -> Result<()> {
            self.log.lock().unwrap().filter = Some(filter);
            self.opened_at = Some(Instant::now());
            Ok(())
        }

        async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
            let opened_at = self.opened_at.expect("send before open");
            let mut log = self.log.lock().unwrap();
            if self.fail_on_send == Some(log.sends.len()) {
                return Err(io::Error::new(io::ErrorKind::NetworkDown, "interface down"));
            }
            let target = parse_arp_frame(frame).unwrap().target_proto_addr;
            log.sends.push((opened_at.elapsed(), target));
            Ok(())
        }

        async fn try_receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
            let opened_at = self.opened_at.expect("receive before open");
            let deadline = Instant::now() + timeout;
            match self.script.front() {
                Some((offset, _)) if opened_at + *offset <= deadline => {
                    tokio::time::sleep_until(opened_at + *offset).await;
                    Ok(self.script.pop_front().map(|(_, frame)| frame))
                }
                _ => {
                    tokio::time::sleep_until(deadline).await;
                    Ok(None)
                }
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.log.lock().unwrap().closes += 1;
            if self.fail_on_close {
                return Err(Error::Resource("failed to close packet stream".into()));
            }
            Ok(())
        }
    }

    fn arp_to_local(operation: ArpOperation, sender_ip: Ipv4Addr, sender_mac: MacAddr) -> Vec<u8> {
        build_arp_frame(operation, LOCAL.mac, sender_mac, sender_ip, LOCAL.mac, LOCAL.ip).to_vec()
    }

    fn reply(sender_d: u8, sender_mac: MacAddr) -> Vec<u8> {
        arp_to_local(ArpOperations::Reply, Ipv4Addr::new(10, 0, 0, sender_d), sender_mac)
    }

    fn targets(first_d: u8, stop_d: u8) -> AddressRange {
        AddressRange::new(Ipv4Addr::new(10, 0, 0, first_d), Ipv4Addr::new(10, 0, 0, stop_d))
            .unwrap()
    }

    async fn resolver(session: ScriptedSession, config: ResolverConfig) -> Resolver<ScriptedSession> {
        Resolver::open(session, LOCAL, config).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_reply_yields_single_binding() {
        let (session, log) = ScriptedSession::new(vec![(Duration::from_millis(300), reply(1, MAC_A))]);
        let mut bindings = Vec::new();
        let resolver = resolver(session, ResolverConfig::default()).await;
        assert_eq!(resolver.local(), LOCAL);
        let summary = resolver.scan(&targets(1, 2), &mut bindings).await.unwrap();

        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(bindings[0].mac, MAC_A);
        assert_eq!(summary.bindings, 1);
        assert_eq!(summary.targets, 1);

        let log = log.lock().unwrap();
        assert_eq!(log.filter, Some(CaptureFilter::for_mac(LOCAL.mac)));
        assert_eq!(log.closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_for_other_target_in_window_is_dropped() {
        // 10.0.0.2 answers while 10.0.0.1 is being queried and is silent in its own window
        let (session, _log) = ScriptedSession::new(vec![
            (Duration::from_millis(200), reply(2, MAC_B)),
            (Duration::from_millis(400), reply(1, MAC_A)),
        ]);
        let mut bindings = Vec::new();
        let summary = resolver(session, ResolverConfig::default())
            .await
            .scan(&targets(1, 3), &mut bindings)
            .await
            .unwrap();

        let resolved: Vec<_> = bindings.iter().map(|b| (b.ip, b.mac)).collect();
        assert_eq!(resolved, vec![(Ipv4Addr::new(10, 0, 0, 1), MAC_A)]);
        assert_eq!(summary.discarded, 1);
        assert_eq!(summary.targets, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_runs_to_end_after_match() {
        let (session, _log) = ScriptedSession::new(vec![
            (Duration::from_millis(100), reply(7, MAC_A)),
            (Duration::from_millis(900), reply(7, MAC_B)),
        ]);
        let mut aggregator = ConflictAggregator::new();
        resolver(session, ResolverConfig::default())
            .await
            .scan(&targets(7, 8), &mut aggregator)
            .await
            .unwrap();

        let conflicts: Vec<_> = aggregator.conflicts().collect();
        assert_eq!(conflicts, vec![(Ipv4Addr::new(10, 0, 0, 7), &[MAC_A, MAC_B][..])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_reply_is_not_deduplicated() {
        let (session, _log) = ScriptedSession::new(vec![
            (Duration::from_millis(100), reply(7, MAC_A)),
            (Duration::from_millis(500), reply(7, MAC_A)),
        ]);
        let mut bindings = Vec::new();
        resolver(session, ResolverConfig::default())
            .await
            .scan(&targets(7, 8), &mut bindings)
            .await
            .unwrap();
        assert_eq!(bindings.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_target_is_resent_every_interval() {
        let (session, log) = ScriptedSession::new(Vec::new());
        let config = ResolverConfigBuilder::new()
            .with_per_target_timeout(Duration::from_secs(3))
            .with_resend_interval(Duration::from_secs(1))
            .build();
        let start = Instant::now();
        let mut bindings = Vec::new();
        resolver(session, config)
            .await
            .scan(&targets(9, 10), &mut bindings)
            .await
            .unwrap();

        assert!(bindings.is_empty());
        assert!(start.elapsed() >= Duration::from_secs(3));
        let log = log.lock().unwrap();
        assert_eq!(log.sends.len(), 3);
        assert!(log.sends.iter().all(|(_, ip)| *ip == Ipv4Addr::new(10, 0, 0, 9)));
        for pair in log.sends.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resend_is_not_delayed_by_poll_granularity() {
        let (session, log) = ScriptedSession::new(Vec::new());
        let config = ResolverConfigBuilder::new()
            .with_per_target_timeout(Duration::from_millis(1000))
            .with_resend_interval(Duration::from_millis(330))
            .build();
        resolver(session, config)
            .await
            .scan(&targets(9, 10), &mut Vec::<ResolvedBinding>::new())
            .await
            .unwrap();

        let log = log.lock().unwrap();
        let offsets: Vec<_> = log.sends.iter().map(|(offset, _)| *offset).collect();
        // ceil(1000 / 330) = 4
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_millis(330),
                Duration::from_millis(660),
                Duration::from_millis(990),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_ends_on_time_with_long_poll() {
        let (session, log) = ScriptedSession::new(Vec::new());
        let config = ResolverConfigBuilder::new()
            .with_per_target_timeout(Duration::from_millis(250))
            .with_resend_interval(Duration::from_millis(100))
            .with_poll_timeout(Duration::from_secs(5))
            .build();
        let start = Instant::now();
        resolver(session, config)
            .await
            .scan(&targets(1, 3), &mut Vec::<ResolvedBinding>::new())
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_millis(500));
        let log = log.lock().unwrap();
        let offsets: Vec<_> = log.sends.iter().map(|(offset, _)| offset.as_millis()).collect();
        assert_eq!(offsets, vec![0, 100, 200, 250, 350, 450]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_window_sends_once_per_target() {
        let (session, log) = ScriptedSession::new(Vec::new());
        let start = Instant::now();
        let summary = resolver(session, ResolverConfig::default())
            .await
            .scan(&targets(1, 4), &mut Vec::<ResolvedBinding>::new())
            .await
            .unwrap();

        assert_eq!(summary.requests_sent, 3);
        assert!(start.elapsed() >= Duration::from_secs(3));
        let sent: Vec<_> = log.lock().unwrap().sends.iter().map(|(_, ip)| *ip).collect();
        assert_eq!(sent, targets(1, 4).iter().collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_and_request_frames_are_skipped() {
        let (session, _log) = ScriptedSession::new(vec![
            (Duration::from_millis(100), vec![0xde, 0xad]),
            (
                Duration::from_millis(200),
                arp_to_local(ArpOperations::Request, Ipv4Addr::new(10, 0, 0, 1), MAC_B),
            ),
            (Duration::from_millis(300), reply(1, MAC_A)),
        ]);
        let mut bindings = Vec::new();
        let summary = resolver(session, ResolverConfig::default())
            .await
            .scan(&targets(1, 2), &mut bindings)
            .await
            .unwrap();

        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].mac, MAC_A);
        assert_eq!(summary.discarded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_aborts_and_keeps_bindings() {
        let (session, log) =
            ScriptedSession::new(vec![(Duration::from_millis(300), reply(1, MAC_A))]);
        let session = session.failing_on_send(1);
        let mut aggregator = ConflictAggregator::new();
        let result = resolver(session, ResolverConfig::default())
            .await
            .scan(&targets(1, 5), &mut aggregator)
            .await;

        assert!(matches!(result, Err(Error::Transmission(_))));
        assert_eq!(aggregator.get(&Ipv4Addr::new(10, 0, 0, 1)), Some(&[MAC_A][..]));
        let log = log.lock().unwrap();
        assert_eq!(log.sends.len(), 1);
        assert_eq!(log.closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_error_wins_over_close_error() {
        let (session, log) = ScriptedSession::new(Vec::new());
        let session = session.failing_on_send(0).failing_on_close();
        let result = resolver(session, ResolverConfig::default())
            .await
            .scan(&targets(1, 2), &mut Vec::<ResolvedBinding>::new())
            .await;

        assert!(matches!(result, Err(Error::Transmission(_))));
        assert_eq!(log.lock().unwrap().closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_error_is_reported() {
        let (session, _log) = ScriptedSession::new(Vec::new());
        let result = resolver(session.failing_on_close(), ResolverConfig::default())
            .await
            .scan(&targets(1, 2), &mut Vec::<ResolvedBinding>::new())
            .await;
        assert!(matches!(result, Err(Error::Resource(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_scan() {
        let (session, log) = ScriptedSession::new(Vec::new());
        let resolver = resolver(session, ResolverConfig::default()).await;
        resolver.cancellation_token().cancel();
        let result = resolver.scan(&targets(1, 5), &mut Vec::<ResolvedBinding>::new()).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        let log = log.lock().unwrap();
        assert!(log.sends.is_empty());
        assert_eq!(log.closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_mid_scan() {
        let (session, log) = ScriptedSession::new(Vec::new());
        let token = CancellationToken::new();
        let config = ResolverConfigBuilder::new()
            .with_cancellation(token.clone())
            .build();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            token.cancel();
        });
        let result = resolver(session, config)
            .await
            .scan(&targets(1, 10), &mut Vec::<ResolvedBinding>::new())
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        let log = log.lock().unwrap();
        assert_eq!(log.sends.len(), 2);
        assert_eq!(log.closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_range_only_opens_and_closes() {
        let (session, log) = ScriptedSession::new(Vec::new());
        let summary = resolver(session, ResolverConfig::default())
            .await
            .scan(&targets(1, 1), &mut Vec::<ResolvedBinding>::new())
            .await
            .unwrap();

        assert_eq!(summary, ScanSummary::default());
        let log = log.lock().unwrap();
        assert!(log.sends.is_empty());
        assert_eq!(log.closes, 1);
    }
}
