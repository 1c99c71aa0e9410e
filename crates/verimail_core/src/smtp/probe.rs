//! Per-MX SMTP conversation engine.
//!
//! Flow: connect -> banner -> EHLO (HELO fallback) -> optional STARTTLS ->
//! MAIL FROM -> RCPT TO -> QUIT. The probe never sends DATA; the RCPT TO
//! reply is the verification signal. A batch variant reuses one conversation
//! for many recipients at the same MX.
//!
//! Concurrency is capped here: a global semaphore bounds simultaneous SMTP
//! conversations and a per-destination-host semaphore keeps any single MX
//! from seeing a connection burst.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::model::MxHost;
use crate::smtp::reply::SmtpReply;

/// Probe identity, timeouts, and retry policy.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Domain announced in EHLO/HELO.
    pub helo_domain: String,
    /// Envelope sender for MAIL FROM.
    pub from_address: String,
    /// Destination port; 25 in production, overridden in tests.
    pub port: u16,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    /// Budget for one full conversation against one target host.
    pub target_budget: Duration,
    /// Attempt STARTTLS when the server offers it.
    pub use_starttls: bool,
    /// Extra attempts after a greylist deferral. 0 disables retries.
    pub greylist_retries: u32,
    pub greylist_delay: Duration,
    /// Cap on simultaneous conversations across all hosts.
    pub max_concurrency: usize,
    /// Cap on simultaneous conversations to one destination host.
    pub per_host_concurrency: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            helo_domain: "verify.localdomain".to_string(),
            from_address: "postmaster@verify.localdomain".to_string(),
            port: 25,
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            target_budget: Duration::from_secs(20),
            use_starttls: true,
            greylist_retries: 0,
            greylist_delay: Duration::from_secs(35),
            max_concurrency: 20,
            per_host_concurrency: 4,
        }
    }
}

/// SMTP verification probe with shared concurrency caps.
pub struct SmtpProbe {
    settings: ProbeSettings,
    global: Arc<Semaphore>,
    per_host: DashMap<String, Arc<Semaphore>>,
}

impl SmtpProbe {
    pub fn new(settings: ProbeSettings) -> Self {
        let global = Arc::new(Semaphore::new(settings.max_concurrency.max(1)));
        Self {
            settings,
            global,
            per_host: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        self.per_host
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.settings.per_host_concurrency.max(1))))
            .clone()
    }

    /// Probe one recipient, trying MX hosts in preference order until a
    /// definitive reply or all hosts are exhausted.
    pub async fn check(&self, recipient: &str, mx_hosts: &[MxHost]) -> SmtpReply {
        let mut last = SmtpReply::network_failure("no MX hosts to contact");
        for mx in mx_hosts {
            let reply = self.check_host(recipient, &mx.host).await;
            if !reply.is_network_failure() {
                return reply;
            }
            debug!(host = %mx.host, error = %reply.message, "MX unreachable, trying next");
            last = reply;
        }
        last
    }

    /// Probe one recipient against one host, honouring the greylist retry
    /// policy (disabled by default).
    pub async fn check_host(&self, recipient: &str, host: &str) -> SmtpReply {
        let mut attempt = 0;
        loop {
            let reply = self.check_host_once(recipient, host).await;
            if reply.is_greylisted() && attempt < self.settings.greylist_retries {
                attempt += 1;
                debug!(
                    %host,
                    attempt,
                    "greylisted, retrying after {:?}",
                    self.settings.greylist_delay
                );
                tokio::time::sleep(self.settings.greylist_delay).await;
                continue;
            }
            return reply;
        }
    }

    async fn check_host_once(&self, recipient: &str, host: &str) -> SmtpReply {
        let _global = self.global.clone().acquire_owned().await.expect("probe semaphore closed");
        let _host_permit = self.host_semaphore(host).acquire_owned().await.expect("probe semaphore closed");

        match timeout(self.settings.target_budget, self.converse(host, &[recipient])).await {
            Ok(mut replies) => replies.pop().unwrap_or_else(|| {
                SmtpReply::network_failure("conversation produced no reply")
            }),
            Err(_) => SmtpReply::network_failure(format!("target budget exceeded for {host}")),
        }
    }

    /// Probe many recipients of the same domain over one conversation.
    ///
    /// The greeting, EHLO, TLS state, and MAIL FROM are shared; one RCPT TO
    /// is issued per recipient and each reply is recorded independently. A
    /// non-250 does not end the batch; a network failure marks the failed
    /// and remaining recipients with code-0 replies. If the conversation
    /// cannot even be set up, every recipient is probed individually as a
    /// fallback.
    pub async fn check_batch(&self, recipients: &[String], host: &str) -> Vec<SmtpReply> {
        if recipients.is_empty() {
            return Vec::new();
        }

        let replies = {
            let _global = self.global.clone().acquire_owned().await.expect("probe semaphore closed");
            let _host_permit = self.host_semaphore(host).acquire_owned().await.expect("probe semaphore closed");

            let refs: Vec<&str> = recipients.iter().map(String::as_str).collect();
            let budget = self
                .settings
                .target_budget
                .mul_f64((recipients.len() as f64 / 10.0).max(1.0));
            match timeout(budget, self.converse(host, &refs)).await {
                Ok(replies) => replies,
                Err(_) => Vec::new(),
            }
        };

        // Setup failed before any RCPT: degrade to individual probes.
        if replies.is_empty() || replies.iter().all(SmtpReply::is_network_failure) {
            debug!(%host, "batched conversation failed, probing individually");
            let mut out = Vec::with_capacity(recipients.len());
            for recipient in recipients {
                out.push(self.check_host(recipient, host).await);
            }
            return out;
        }

        replies
    }

    /// Run one conversation, returning one reply per recipient.
    async fn converse(&self, host: &str, recipients: &[&str]) -> Vec<SmtpReply> {
        let fail_all = |msg: String| -> Vec<SmtpReply> {
            recipients
                .iter()
                .map(|_| SmtpReply::network_failure(msg.clone()))
                .collect()
        };

        let mut conv = match Conversation::open(host, &self.settings).await {
            Ok(conv) => conv,
            Err(e) => return fail_all(format!("connect failed: {e}")),
        };

        // Banner
        match conv.read_reply().await {
            Ok((220, _)) => {}
            Ok((code, msg)) => return fail_all(format!("unexpected banner {code}: {msg}")),
            Err(e) => return fail_all(format!("banner read failed: {e}")),
        }

        // EHLO, falling back to HELO for old servers
        let helo = self.settings.helo_domain.clone();
        let ehlo = match conv.command(&format!("EHLO {helo}")).await {
            Ok((250, msg)) => msg,
            Ok(_) => match conv.command(&format!("HELO {helo}")).await {
                Ok((250, msg)) => msg,
                Ok((code, msg)) => {
                    conv.quit().await;
                    return fail_all(format!("EHLO/HELO rejected {code}: {msg}"));
                }
                Err(e) => return fail_all(format!("HELO failed: {e}")),
            },
            Err(e) => return fail_all(format!("EHLO failed: {e}")),
        };

        // STARTTLS when offered. A refusal continues in plaintext; a broken
        // handshake is a network failure.
        if self.settings.use_starttls && ehlo.to_ascii_uppercase().contains("STARTTLS") {
            match conv.command("STARTTLS").await {
                Ok((220, _)) => {
                    if let Err(e) = conv.upgrade_tls(host, &self.settings).await {
                        return fail_all(format!("TLS handshake failed: {e}"));
                    }
                    match conv.command(&format!("EHLO {helo}")).await {
                        Ok((250, _)) => {}
                        Ok((code, msg)) => {
                            conv.quit().await;
                            return fail_all(format!("EHLO after STARTTLS rejected {code}: {msg}"));
                        }
                        Err(e) => return fail_all(format!("EHLO after STARTTLS failed: {e}")),
                    }
                }
                Ok((code, msg)) => {
                    debug!(%host, code, %msg, "STARTTLS refused, continuing in plaintext");
                }
                Err(e) => return fail_all(format!("STARTTLS failed: {e}")),
            }
        }

        // MAIL FROM, shared by the whole batch
        let from = self.settings.from_address.clone();
        match conv.command(&format!("MAIL FROM:<{from}>")).await {
            Ok((250, _)) => {}
            Ok((code, msg)) => {
                conv.quit().await;
                return fail_all(format!("MAIL FROM rejected {code}: {msg}"));
            }
            Err(e) => return fail_all(format!("MAIL FROM failed: {e}")),
        }

        // One RCPT TO per recipient; replies recorded independently.
        let mut replies = Vec::with_capacity(recipients.len());
        let mut network_down: Option<String> = None;
        for recipient in recipients {
            if let Some(msg) = &network_down {
                replies.push(SmtpReply::network_failure(msg.clone()));
                continue;
            }
            match conv.command(&format!("RCPT TO:<{recipient}>")).await {
                Ok((code, msg)) => {
                    debug!(%host, recipient, code, "RCPT reply");
                    replies.push(SmtpReply::classify(code, msg));
                }
                Err(e) => {
                    let msg = format!("RCPT failed: {e}");
                    warn!(%host, recipient, error = %e, "connection lost mid-batch");
                    replies.push(SmtpReply::network_failure(msg.clone()));
                    network_down = Some(msg);
                }
            }
        }

        if network_down.is_none() {
            conv.quit().await;
        }
        replies
    }
}

/// One live connection, plaintext or upgraded to TLS.
struct Conversation {
    stream: SmtpStream,
    command_timeout: Duration,
}

impl Conversation {
    async fn open(host: &str, settings: &ProbeSettings) -> io::Result<Self> {
        let addr = (host.to_string(), settings.port);
        let tcp = timeout(settings.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))??;
        Ok(Self {
            stream: SmtpStream::Plain(BufStream::new(tcp)),
            command_timeout: settings.command_timeout,
        })
    }

    /// Read one (possibly multi-line) reply: `250-...` continues, `250 ...`
    /// terminates. Returns the final code and the joined message text.
    async fn read_reply(&mut self) -> io::Result<(u16, String)> {
        let mut lines: Vec<String> = Vec::new();
        loop {
            let mut line = String::new();
            let n = timeout(self.command_timeout, self.stream.read_line(&mut line))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "reply timeout"))??;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                ));
            }
            let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
            let done = trimmed.len() < 4 || trimmed.as_bytes()[3] == b' ';
            lines.push(trimmed);
            if done {
                break;
            }
        }

        let last = lines.last().expect("at least one line read");
        let code = last.get(..3).and_then(|s| s.parse::<u16>().ok()).unwrap_or(0);
        Ok((code, lines.join("\n")))
    }

    async fn command(&mut self, command: &str) -> io::Result<(u16, String)> {
        debug!(">>> {command}");
        let payload = format!("{command}\r\n");
        timeout(self.command_timeout, async {
            self.stream.write_all(payload.as_bytes()).await?;
            self.stream.flush().await
        })
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timeout"))??;

        let (code, message) = self.read_reply().await?;
        debug!("<<< {code} {message}");
        Ok((code, message))
    }

    /// Replace the plaintext stream with a TLS session over the same socket.
    async fn upgrade_tls(&mut self, host: &str, settings: &ProbeSettings) -> io::Result<()> {
        let plain = match std::mem::replace(&mut self.stream, SmtpStream::Closed) {
            SmtpStream::Plain(buf) => buf.into_inner(),
            other => {
                self.stream = other;
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "connection already upgraded",
                ));
            }
        };

        let connector = TlsConnector::from(tls_client_config());
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let tls = timeout(settings.connect_timeout, connector.connect(server_name, plain))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timeout"))??;
        self.stream = SmtpStream::Tls(Box::new(BufStream::new(tls)));
        Ok(())
    }

    /// Best-effort QUIT; the verdict never depends on its reply.
    async fn quit(&mut self) {
        let _ = timeout(Duration::from_secs(5), async {
            self.stream.write_all(b"QUIT\r\n").await?;
            self.stream.flush().await
        })
        .await;
    }
}

enum SmtpStream {
    Plain(BufStream<TcpStream>),
    Tls(Box<BufStream<tokio_rustls::client::TlsStream<TcpStream>>>),
    Closed,
}

impl SmtpStream {
    async fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.read_line(buf).await,
            Self::Tls(s) => s.read_line(buf).await,
            Self::Closed => Err(io::Error::new(io::ErrorKind::NotConnected, "stream closed")),
        }
    }
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Self::Closed => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "stream closed",
            ))),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Self::Closed => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "stream closed",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Self::Closed => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Self::Closed => Poll::Ready(Ok(())),
        }
    }
}

static TLS_CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();

/// Shared TLS client config. Certificate verification is disabled: MX hosts
/// routinely present certificates for other names, and the probe reads reply
/// codes, not mail.
fn tls_client_config() -> Arc<ClientConfig> {
    TLS_CONFIG
        .get_or_init(|| {
            let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
            let _ = CryptoProvider::install_default(rustls::crypto::aws_lc_rs::default_provider());
            let config = ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerification { provider }))
                .with_no_client_auth();
            Arc::new(config)
        })
        .clone()
}

/// Accepts any server certificate but still verifies handshake signatures.
#[derive(Debug)]
struct NoVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
