//! Shared test support: a scripted mock SMTP server and a static MX
//! resolver, so the full tier cascade runs in-process without touching the
//! network.

// Each test binary uses a different slice of this module.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use verimail_core::dns::{DnsError, MxRecords, MxResolve};
use verimail_core::{MxHost, VerifierConfig};

/// Reply produced for one RCPT TO recipient.
pub type RcptBehavior = Arc<dyn Fn(&str) -> (u16, String) + Send + Sync>;

/// Options for shaping a mock server's behavior.
#[derive(Clone)]
pub struct MockOptions {
    /// Delay before the 220 banner is written.
    pub banner_delay: Duration,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            banner_delay: Duration::ZERO,
        }
    }
}

/// A minimal scripted SMTP server.
///
/// Accepts connections, speaks the usual greeting/EHLO/MAIL/RCPT/QUIT
/// dialogue, and answers each RCPT TO through the supplied behavior
/// function. Every received command line is recorded for assertions.
pub struct MockSmtp {
    port: u16,
    transcript: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    _accept_task: JoinHandle<()>,
}

impl MockSmtp {
    pub async fn spawn(rcpt: impl Fn(&str) -> (u16, String) + Send + Sync + 'static) -> Self {
        Self::spawn_with(MockOptions::default(), rcpt).await
    }

    pub async fn spawn_with(
        options: MockOptions,
        rcpt: impl Fn(&str) -> (u16, String) + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock SMTP listener");
        let port = listener.local_addr().expect("mock listener addr").port();

        let transcript: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let behavior: RcptBehavior = Arc::new(rcpt);

        let accept_transcript = transcript.clone();
        let accept_connections = connections.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accept_connections.fetch_add(1, Ordering::SeqCst);
                let transcript = accept_transcript.clone();
                let behavior = behavior.clone();
                let options = options.clone();
                tokio::spawn(async move {
                    let _ = session(stream, transcript, behavior, options).await;
                });
            }
        });

        Self {
            port,
            transcript,
            connections,
            _accept_task: accept_task,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Every command line received, across all connections.
    pub fn transcript(&self) -> Vec<String> {
        self.transcript.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// The core must never issue DATA.
    pub fn assert_no_data(&self) {
        let transcript = self.transcript();
        assert!(
            !transcript
                .iter()
                .any(|line| line.trim().eq_ignore_ascii_case("DATA")),
            "DATA found in SMTP transcript: {transcript:?}"
        );
    }

    /// RCPT TO recipients seen, in order.
    pub fn rcpt_recipients(&self) -> Vec<String> {
        self.transcript()
            .iter()
            .filter_map(|line| {
                let upper = line.to_ascii_uppercase();
                if upper.starts_with("RCPT TO:") {
                    Some(
                        line[8..]
                            .trim()
                            .trim_start_matches('<')
                            .trim_end_matches('>')
                            .to_string(),
                    )
                } else {
                    None
                }
            })
            .collect()
    }
}

async fn session(
    stream: TcpStream,
    transcript: Arc<Mutex<Vec<String>>>,
    behavior: RcptBehavior,
    options: MockOptions,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    if !options.banner_delay.is_zero() {
        tokio::time::sleep(options.banner_delay).await;
    }
    write_half.write_all(b"220 mock.local ESMTP ready\r\n").await?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end_matches(['\r', '\n']).to_string();
        transcript.lock().unwrap().push(command.clone());
        let upper = command.to_ascii_uppercase();

        let reply: String = if upper.starts_with("EHLO") || upper.starts_with("HELO") {
            "250-mock.local greets you\r\n250 PIPELINING\r\n".to_string()
        } else if upper.starts_with("MAIL FROM") {
            "250 2.1.0 sender ok\r\n".to_string()
        } else if upper.starts_with("RCPT TO:") {
            let recipient = command[8..]
                .trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string();
            let (code, text) = behavior(&recipient);
            format!("{code} {text}\r\n")
        } else if upper.starts_with("QUIT") {
            write_half.write_all(b"221 2.0.0 bye\r\n").await?;
            return Ok(());
        } else if upper.starts_with("DATA") {
            // The verifier must never get here; reject loudly if it does.
            "502 5.5.1 command not taken\r\n".to_string()
        } else {
            "250 2.0.0 ok\r\n".to_string()
        };
        write_half.write_all(reply.as_bytes()).await?;
    }
}

/// Scripted DNS: a fixed domain -> answer table plus a query counter.
pub struct StaticResolver {
    routes: Mutex<HashMap<String, Result<Vec<MxHost>, StaticFailure>>>,
    calls: AtomicUsize,
}

#[derive(Clone, Copy)]
enum StaticFailure {
    NxDomain,
    Transient,
    NullMx,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Route a domain to a single MX host.
    pub fn route(self, domain: &str, host: &str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(domain.to_string(), Ok(vec![MxHost::new(host, 10)]));
        self
    }

    pub fn route_hosts(self, domain: &str, hosts: Vec<MxHost>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(domain.to_string(), Ok(hosts));
        self
    }

    pub fn nxdomain(self, domain: &str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(domain.to_string(), Err(StaticFailure::NxDomain));
        self
    }

    pub fn transient(self, domain: &str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(domain.to_string(), Err(StaticFailure::Transient));
        self
    }

    pub fn null_mx(self, domain: &str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(domain.to_string(), Err(StaticFailure::NullMx));
        self
    }

    pub fn query_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MxResolve for StaticResolver {
    async fn resolve(&self, domain: &str) -> Result<MxRecords, DnsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let route = self.routes.lock().unwrap().get(domain).cloned();
        match route {
            Some(Ok(hosts)) => Ok(MxRecords {
                domain: domain.to_string(),
                hosts,
                fallback: false,
                ttl: Duration::from_secs(3600),
            }),
            Some(Err(StaticFailure::NxDomain)) => Err(DnsError::NxDomain(domain.to_string())),
            Some(Err(StaticFailure::NullMx)) => Err(DnsError::NullMx(domain.to_string())),
            Some(Err(StaticFailure::Transient)) => Err(DnsError::Transient {
                domain: domain.to_string(),
                message: "SERVFAIL".to_string(),
            }),
            None => Err(DnsError::NxDomain(domain.to_string())),
        }
    }
}

/// Verifier config pointed at a mock server, with short test timeouts.
pub fn test_config(port: u16) -> VerifierConfig {
    VerifierConfig {
        smtp_port: port,
        connect_timeout: Duration::from_millis(500),
        command_timeout: Duration::from_millis(800),
        target_budget: Duration::from_secs(5),
        request_budget: Duration::from_secs(5),
        use_starttls: false,
        ..VerifierConfig::default()
    }
}

/// True when the local part looks like a catch-all probe's random token.
pub fn is_random_probe_local(local: &str) -> bool {
    local.len() >= 16 && local.chars().all(|c| c.is_ascii_alphanumeric())
}
