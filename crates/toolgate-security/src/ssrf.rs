use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::{HeaderMap, HeaderName, AUTHORIZATION, COOKIE, LOCATION, PROXY_AUTHORIZATION};
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use toolgate_core::{ToolgateError, ToolgateResult};
use tracing::{debug, warn};

/// Redirect hops followed by [`GuardedClient::send`] before giving up.
pub const MAX_REDIRECTS: usize = 10;

const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which non-public targets a remote MCP URL may point at.
///
/// The default rejects everything except globally routable addresses.
#[derive(Debug, Clone, Deserialize)]
pub struct SsrfPolicy {
    /// Allow `localhost` and loopback addresses (local testing).
    #[serde(default)]
    pub allow_loopback: bool,
    /// Allow RFC1918 / ULA / CGNAT and other non-global unicast ranges.
    /// Link-local addresses stay blocked.
    #[serde(default)]
    pub allow_private: bool,
    /// Hosts (and their subdomains) exempt from the address checks.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    /// Upper bound for resolving a hostname.
    #[serde(default = "default_dns_timeout", deserialize_with = "duration_ms::deserialize")]
    pub dns_timeout: Duration,
}

fn default_dns_timeout() -> Duration {
    DEFAULT_DNS_TIMEOUT
}

mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

impl Default for SsrfPolicy {
    fn default() -> Self {
        Self {
            allow_loopback: false,
            allow_private: false,
            allowed_hosts: Vec::new(),
            dns_timeout: DEFAULT_DNS_TIMEOUT,
        }
    }
}

impl SsrfPolicy {
    /// Policy that additionally allows loopback targets.
    pub fn allow_loopback() -> Self {
        Self {
            allow_loopback: true,
            ..Self::default()
        }
    }

    fn is_allowlisted(&self, host: &str) -> bool {
        self.allowed_hosts
            .iter()
            .any(|allowed| host_matches_allowlist(host, allowed))
    }
}

/// A URL that passed [`validate_url`].
///
/// `Display` prints the redacted form, so logging a `SecureUrl` never leaks
/// its query string.
#[derive(Clone, PartialEq, Eq)]
pub struct SecureUrl(Url);

impl SecureUrl {
    /// The underlying URL.
    pub fn as_url(&self) -> &Url {
        &self.0
    }

    /// The full URL, including query. Do not log this.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Consume into the underlying URL.
    pub fn into_url(self) -> Url {
        self.0
    }

    /// `scheme://host:port` of this URL.
    pub fn origin(&self) -> String {
        self.0.origin().ascii_serialization()
    }
}

impl fmt::Display for SecureUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&redact_url(&self.0))
    }
}

impl fmt::Debug for SecureUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureUrl({})", redact_url(&self.0))
    }
}

/// Render a URL for logs: credentials, query and fragment are dropped.
pub fn redact_url(url: &Url) -> String {
    let mut clean = url.clone();
    let _ = clean.set_username("");
    let _ = clean.set_password(None);
    clean.set_fragment(None);
    if clean.query().is_some() {
        clean.set_query(None);
        format!("{clean}?<redacted>")
    } else {
        clean.to_string()
    }
}

/// Parse and validate a remote MCP URL against `policy`.
///
/// Rejects non-HTTP(S) schemes, URLs carrying credentials, and any host that
/// is (or resolves to) a loopback, private, link-local, multicast or
/// wildcard address unless `policy` opts in. A hostname that cannot be
/// resolved is rejected.
pub async fn validate_url(raw: &str, policy: &SsrfPolicy) -> ToolgateResult<SecureUrl> {
    let url = Url::parse(raw).map_err(|e| ToolgateError::InvalidUrl(format!("{e}")))?;
    check_url(url, policy).await
}

async fn check_url(url: Url, policy: &SsrfPolicy) -> ToolgateResult<SecureUrl> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ToolgateError::InvalidUrl(format!(
                "unsupported scheme '{scheme}', only http and https are allowed"
            )));
        }
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(ToolgateError::InvalidUrl(
            "credentials in the URL are not allowed, use headers instead".to_string(),
        ));
    }

    let host = url
        .host_str()
        .ok_or_else(|| ToolgateError::InvalidUrl("URL has no host".to_string()))?
        .trim_end_matches('.')
        .to_ascii_lowercase();
    let host_for_ip = host.trim_start_matches('[').trim_end_matches(']');

    if policy.is_allowlisted(&host) || policy.is_allowlisted(host_for_ip) {
        return Ok(SecureUrl(url));
    }

    if let Ok(ip) = host_for_ip.parse::<IpAddr>() {
        check_ip(&host, ip, policy)?;
        return Ok(SecureUrl(url));
    }

    if is_localhost_name(&host) && !policy.allow_loopback {
        return Err(forbidden(&host, "localhost names are not allowed"));
    }

    let port = url
        .port_or_known_default()
        .ok_or_else(|| ToolgateError::InvalidUrl("URL has no port".to_string()))?;
    resolve_checked(&host, port, policy).await?;

    Ok(SecureUrl(url))
}

/// Resolves `host` and fails unless every address it resolves to is allowed.
async fn resolve_checked(
    host: &str,
    port: u16,
    policy: &SsrfPolicy,
) -> ToolgateResult<Vec<SocketAddr>> {
    let addrs = match tokio::time::timeout(
        policy.dns_timeout,
        tokio::net::lookup_host((host, port)),
    )
    .await
    {
        Ok(Ok(addrs)) => addrs.collect::<Vec<_>>(),
        Ok(Err(e)) => {
            return Err(forbidden(host, &format!("host could not be resolved: {e}")));
        }
        Err(_) => return Err(forbidden(host, "host resolution timed out")),
    };

    if addrs.is_empty() {
        return Err(forbidden(host, "host resolved to no addresses"));
    }
    if !policy.is_allowlisted(host) {
        for addr in &addrs {
            check_ip(host, addr.ip(), policy)?;
        }
    }
    Ok(addrs)
}

/// DNS resolver installed in every [`GuardedClient`].
///
/// Every connection re-checks the addresses it is about to dial, so a name
/// whose answer changes after [`validate_url`] still cannot reach a
/// forbidden address.
#[derive(Debug, Clone)]
pub struct GuardedResolver {
    policy: Arc<SsrfPolicy>,
}

impl GuardedResolver {
    /// A resolver enforcing `policy`.
    pub fn new(policy: Arc<SsrfPolicy>) -> Self {
        Self { policy }
    }
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let policy = Arc::clone(&self.policy);
        let host = name.as_str().trim_end_matches('.').to_ascii_lowercase();
        Box::pin(async move {
            if is_localhost_name(&host) && !policy.allow_loopback && !policy.is_allowlisted(&host)
            {
                return Err(forbidden(&host, "localhost names are not allowed").into());
            }
            // The connector replaces the port with the one from the URL.
            let addrs = resolve_checked(&host, 0, &policy).await?;
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok(addrs)
        })
    }
}

fn forbidden(host: &str, reason: &str) -> ToolgateError {
    ToolgateError::ForbiddenTarget {
        host: host.to_string(),
        reason: reason.to_string(),
    }
}

fn check_ip(host: &str, ip: IpAddr, policy: &SsrfPolicy) -> ToolgateResult<()> {
    let ip = normalize_ip(ip);
    let class = classify_ip(ip);
    let allowed = match class {
        AddrClass::Public => true,
        AddrClass::Loopback => policy.allow_loopback,
        AddrClass::Private => policy.allow_private,
        AddrClass::LinkLocal | AddrClass::Unroutable => false,
    };
    if allowed {
        return Ok(());
    }
    warn!(host = %host, ip = %ip, class = class.label(), "SSRF guard rejected target");
    Err(forbidden(host, &format!("{ip} is a {} address", class.label())))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddrClass {
    Public,
    Loopback,
    Private,
    LinkLocal,
    Unroutable,
}

impl AddrClass {
    fn label(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Loopback => "loopback",
            Self::Private => "private",
            Self::LinkLocal => "link-local",
            Self::Unroutable => "wildcard or multicast",
        }
    }
}

fn classify_ip(ip: IpAddr) -> AddrClass {
    match ip {
        IpAddr::V4(ip) => classify_ipv4(ip),
        IpAddr::V6(ip) => classify_ipv6(ip),
    }
}

fn classify_ipv4(ip: Ipv4Addr) -> AddrClass {
    if ip.is_unspecified() || ip.is_multicast() || ip.is_broadcast() {
        return AddrClass::Unroutable;
    }
    if ip.is_loopback() {
        return AddrClass::Loopback;
    }
    if ip.is_link_local() {
        return AddrClass::LinkLocal;
    }
    if ip.is_private() || ip.is_documentation() {
        return AddrClass::Private;
    }

    let [a, b, c, _] = ip.octets();
    // 0.0.0.0/8 "this network"
    if a == 0 {
        return AddrClass::Unroutable;
    }
    // 100.64.0.0/10 carrier-grade NAT
    if a == 100 && (64..=127).contains(&b) {
        return AddrClass::Private;
    }
    // 192.0.0.0/24 protocol assignments
    if a == 192 && b == 0 && c == 0 {
        return AddrClass::Private;
    }
    // 198.18.0.0/15 benchmarking
    if a == 198 && (18..=19).contains(&b) {
        return AddrClass::Private;
    }
    // 240.0.0.0/4 reserved
    if a >= 240 {
        return AddrClass::Unroutable;
    }
    AddrClass::Public
}

fn classify_ipv6(ip: Ipv6Addr) -> AddrClass {
    if ip.is_unspecified() || ip.is_multicast() {
        return AddrClass::Unroutable;
    }
    if ip.is_loopback() {
        return AddrClass::Loopback;
    }
    let segments = ip.segments();
    // fe80::/10
    if segments[0] & 0xffc0 == 0xfe80 {
        return AddrClass::LinkLocal;
    }
    // fc00::/7 unique local, fec0::/10 deprecated site-local
    if segments[0] & 0xfe00 == 0xfc00 || segments[0] & 0xffc0 == 0xfec0 {
        return AddrClass::Private;
    }
    // 2001:db8::/32 documentation
    if segments[0] == 0x2001 && segments[1] == 0x0db8 {
        return AddrClass::Private;
    }
    AddrClass::Public
}

/// Unwraps the IPv4 address carried inside an IPv6 address, so it is
/// classified by where it actually leads.
fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => embedded_ipv4(v6).map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}

fn embedded_ipv4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return Some(v4);
    }
    let s = ip.segments();
    let low = |hi: u16, lo: u16| Ipv4Addr::from((u32::from(hi) << 16) | u32::from(lo));
    match s {
        // ::/96 IPv4-compatible (deprecated); `::` and `::1` keep their own meaning.
        [0, 0, 0, 0, 0, 0, hi, lo] if hi != 0 || lo > 1 => Some(low(hi, lo)),
        // 64:ff9b::/96 well-known NAT64 prefix, 64:ff9b:1::/48 local-use NAT64
        [0x0064, 0xff9b, 0, 0, 0, 0, hi, lo] | [0x0064, 0xff9b, 0x0001, _, _, _, hi, lo] => {
            Some(low(hi, lo))
        }
        // 2002::/16 6to4
        [0x2002, hi, lo, ..] => Some(low(hi, lo)),
        // 2001::/32 Teredo, client address stored inverted
        [0x2001, 0, _, _, _, _, hi, lo] => Some(low(!hi, !lo)),
        _ => None,
    }
}

fn is_localhost_name(host: &str) -> bool {
    host == "localhost" || host == "localhost.localdomain" || host.ends_with(".localhost")
}

fn host_matches_allowlist(host: &str, allowed: &str) -> bool {
    let allowed = allowed.trim().trim_end_matches('.');
    if allowed.is_empty() {
        return false;
    }
    if host.eq_ignore_ascii_case(allowed) {
        return true;
    }
    host.len() > allowed.len() + 1
        && host
            .get(host.len() - allowed.len() - 1..)
            .is_some_and(|tail| tail.starts_with('.') && tail[1..].eq_ignore_ascii_case(allowed))
}

// --- Guarded fetch ---

/// One outbound request issued through a [`GuardedClient`].
#[derive(Debug, Clone)]
pub struct GuardedRequest {
    method: Method,
    url: SecureUrl,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    timeout: Option<Duration>,
}

impl GuardedRequest {
    /// A request with the given method and no body.
    pub fn new(method: Method, url: SecureUrl) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// `GET url`.
    pub fn get(url: SecureUrl) -> Self {
        Self::new(Method::GET, url)
    }

    /// `POST url` with `body`.
    pub fn post(url: SecureUrl, body: Vec<u8>) -> Self {
        Self::new(Method::POST, url).body(body)
    }

    /// Set the request body.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Merge `headers` into this request, replacing existing values.
    pub fn headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Add or replace a single header.
    pub fn header(mut self, name: HeaderName, value: reqwest::header::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Per-request timeout covering the whole exchange.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// HTTP client that refuses to reach targets the [`SsrfPolicy`] forbids.
///
/// Automatic redirects are disabled; [`send`](Self::send) follows them
/// itself and validates each target, including a fresh DNS resolution,
/// before the next hop is requested.
#[derive(Clone)]
pub struct GuardedClient {
    http: reqwest::Client,
    policy: Arc<SsrfPolicy>,
    max_redirects: usize,
}

impl GuardedClient {
    /// Build a client enforcing `policy`.
    pub fn new(policy: SsrfPolicy) -> ToolgateResult<Self> {
        let policy = Arc::new(policy);
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .dns_resolver(Arc::new(GuardedResolver::new(Arc::clone(&policy))))
            // Proxies would resolve the host on our behalf and bypass the address checks.
            .no_proxy()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ToolgateError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            policy,
            max_redirects: MAX_REDIRECTS,
        })
    }

    /// The policy this client enforces.
    pub fn policy(&self) -> &SsrfPolicy {
        &self.policy
    }

    /// Validate `raw` against this client's policy.
    pub async fn validate(&self, raw: &str) -> ToolgateResult<SecureUrl> {
        validate_url(raw, &self.policy).await
    }

    /// Send `request`, following redirects only into allowed targets.
    pub async fn send(&self, request: GuardedRequest) -> ToolgateResult<reqwest::Response> {
        let GuardedRequest {
            mut method,
            url,
            mut headers,
            mut body,
            timeout,
        } = request;
        let origin = url.origin();
        let mut next = url.into_url();

        for _ in 0..=self.max_redirects {
            let target = check_url(next, &self.policy).await?;
            if target.origin() != origin {
                strip_credentials(&mut headers);
            }

            let mut builder = self
                .http
                .request(method.clone(), target.as_url().clone())
                .headers(headers.clone());
            if let Some(bytes) = &body {
                builder = builder.body(bytes.clone());
            }
            if let Some(timeout) = timeout {
                builder = builder.timeout(timeout);
            }

            let response = builder.send().await.map_err(send_error)?;

            let status = response.status();
            if !status.is_redirection() {
                return Ok(response);
            }
            let Some(location) = response.headers().get(LOCATION) else {
                return Ok(response);
            };
            let location = location.to_str().map_err(|_| {
                ToolgateError::InvalidUrl("redirect location is not valid UTF-8".to_string())
            })?;
            let resolved = target
                .as_url()
                .join(location)
                .map_err(|e| ToolgateError::InvalidUrl(format!("bad redirect location: {e}")))?;

            debug!(
                status = status.as_u16(),
                from = %target,
                to = %redact_url(&resolved),
                "Following redirect"
            );

            if status == StatusCode::SEE_OTHER
                || (matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND)
                    && method != Method::GET
                    && method != Method::HEAD)
            {
                method = Method::GET;
                body = None;
            }
            next = resolved;
        }

        Err(ToolgateError::Http(format!(
            "too many redirects (max {})",
            self.max_redirects
        )))
    }
}

/// Keeps an SSRF rejection raised by [`GuardedResolver`] at connect time
/// visible as `ForbiddenTarget`.
fn send_error(err: reqwest::Error) -> ToolgateError {
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        if let Some(ToolgateError::ForbiddenTarget { host, reason }) =
            cause.downcast_ref::<ToolgateError>()
        {
            return forbidden(host, reason);
        }
        source = cause.source();
    }
    ToolgateError::Http(err.without_url().to_string())
}

fn strip_credentials(headers: &mut HeaderMap) {
    headers.remove(AUTHORIZATION);
    headers.remove(PROXY_AUTHORIZATION);
    headers.remove(COOKIE);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn deny() -> SsrfPolicy {
        SsrfPolicy::default()
    }

    async fn rejected(url: &str, policy: &SsrfPolicy) -> bool {
        matches!(
            validate_url(url, policy).await,
            Err(ToolgateError::ForbiddenTarget { .. })
        )
    }

    #[tokio::test]
    async fn test_rejects_non_http_schemes() {
        for url in ["file:///etc/passwd", "ftp://example.com/", "gopher://x/"] {
            let err = validate_url(url, &deny()).await.unwrap_err();
            assert!(matches!(err, ToolgateError::InvalidUrl(_)), "{url}");
        }
    }

    #[tokio::test]
    async fn test_rejects_garbage_and_credentials() {
        assert!(matches!(
            validate_url("not a url", &deny()).await,
            Err(ToolgateError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_url("https://user:pw@93.184.216.34/", &deny()).await,
            Err(ToolgateError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_internal_ip_literals() {
        for url in [
            "http://127.0.0.1/",
            "http://127.8.9.1:8080/",
            "http://10.0.0.1/",
            "http://172.16.5.4/",
            "http://192.168.1.1/",
            "http://169.254.169.254/latest/meta-data/",
            "http://100.64.0.1/",
            "http://0.0.0.0/",
            "http://224.0.0.1/",
            "http://255.255.255.255/",
            "http://[::1]/",
            "http://[::]/",
            "http://[fe80::1]/",
            "http://[fd00::1]/",
            "http://[ff02::1]/",
            "http://[::ffff:127.0.0.1]/",
            "http://[::ffff:10.1.2.3]/",
            // IPv4 embedded through NAT64, IPv4-compatible, 6to4 and Teredo
            "http://[64:ff9b::a9fe:a9fe]/",
            "http://[64:ff9b::7f00:1]/",
            "http://[64:ff9b:1::a00:1]/",
            "http://[::127.0.0.1]/",
            "http://[::a9fe:a9fe]/",
            "http://[2002:a9fe:a9fe::]/",
            "http://[2002:7f00:1::]/",
            "http://[2002:c0a8:101::1]/",
            "http://[2001:0:4136:e378:8000:63bf:80ff:fffe]/",
        ] {
            assert!(rejected(url, &deny()).await, "{url} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_rejects_localhost_names_without_lookup() {
        assert!(rejected("http://localhost:3000/mcp", &deny()).await);
        assert!(rejected("http://api.localhost/mcp", &deny()).await);
        assert!(rejected("http://LOCALHOST./mcp", &deny()).await);
    }

    #[tokio::test]
    async fn test_accepts_public_ip_literals() {
        for url in [
            "https://93.184.216.34/mcp",
            "http://8.8.8.8:8080/sse",
            "https://[2606:4700:4700::1111]/mcp",
        ] {
            let secure = validate_url(url, &deny()).await.unwrap();
            assert_eq!(secure.as_str(), Url::parse(url).unwrap().as_str());
        }
    }

    #[tokio::test]
    async fn test_loopback_bypass_is_explicit() {
        let policy = SsrfPolicy::allow_loopback();
        assert!(validate_url("http://127.0.0.1:9000/mcp", &policy).await.is_ok());
        assert!(validate_url("http://[::1]:9000/mcp", &policy).await.is_ok());
        // The loopback bypass does not open private ranges.
        assert!(rejected("http://10.0.0.1/", &policy).await);
        assert!(rejected("http://169.254.169.254/", &policy).await);
    }

    #[tokio::test]
    async fn test_private_bypass_keeps_link_local_and_wildcard_blocked() {
        let policy = SsrfPolicy {
            allow_private: true,
            ..SsrfPolicy::default()
        };
        assert!(validate_url("http://10.1.2.3/", &policy).await.is_ok());
        assert!(validate_url("http://[fd12::1]/", &policy).await.is_ok());
        assert!(rejected("http://127.0.0.1/", &policy).await);
        assert!(rejected("http://169.254.169.254/", &policy).await);
        assert!(rejected("http://0.0.0.0/", &policy).await);
    }

    #[tokio::test]
    async fn test_allowed_hosts_bypass() {
        let policy = SsrfPolicy {
            allowed_hosts: vec!["internal.corp".to_string(), "10.0.0.7".to_string()],
            ..SsrfPolicy::default()
        };
        assert!(validate_url("https://tools.internal.corp/mcp", &policy).await.is_ok());
        assert!(validate_url("http://10.0.0.7/mcp", &policy).await.is_ok());
        assert!(rejected("http://10.0.0.8/mcp", &policy).await);
    }

    #[tokio::test]
    async fn test_resolver_checks_addresses_at_connect_time() {
        let strict = GuardedResolver::new(Arc::new(deny()));
        let name: Name = "localhost".parse().unwrap();
        let err = strict.resolve(name).await.err().unwrap();
        assert!(err.to_string().contains("localhost"), "{err}");

        let err = resolve_checked("127.0.0.1", 0, &deny()).await.unwrap_err();
        assert!(matches!(err, ToolgateError::ForbiddenTarget { .. }));

        let relaxed = GuardedResolver::new(Arc::new(SsrfPolicy::allow_loopback()));
        let name: Name = "localhost".parse().unwrap();
        let addrs: Vec<SocketAddr> = relaxed.resolve(name).await.unwrap().collect();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|a| a.ip().is_loopback()));
    }

    #[test]
    fn test_embedded_ipv4_is_unwrapped() {
        let unwrap = |s: &str| normalize_ip(s.parse().unwrap());
        let v4 = |s: &str| IpAddr::V4(s.parse().unwrap());
        assert_eq!(unwrap("64:ff9b::a9fe:a9fe"), v4("169.254.169.254"));
        assert_eq!(unwrap("::127.0.0.1"), v4("127.0.0.1"));
        assert_eq!(unwrap("2002:7f00:1::"), v4("127.0.0.1"));
        assert_eq!(unwrap("2001:0:4136:e378:8000:63bf:80ff:fffe"), v4("127.0.0.1"));
        // `::1` and `::` stay IPv6 loopback and unspecified.
        assert_eq!(unwrap("::1"), "::1".parse::<IpAddr>().unwrap());
        assert_eq!(unwrap("::"), "::".parse::<IpAddr>().unwrap());
        let public: IpAddr = "2606:4700:4700::1111".parse().unwrap();
        assert_eq!(normalize_ip(public), public);
    }

    #[test]
    fn test_host_matches_allowlist_boundaries() {
        assert!(host_matches_allowlist("example.com", "example.com"));
        assert!(host_matches_allowlist("a.example.com", "example.com"));
        assert!(!host_matches_allowlist("badexample.com", "example.com"));
        assert!(!host_matches_allowlist("example.com", ""));
    }

    #[test]
    fn test_redact_url_strips_secrets() {
        let url = Url::parse("https://user:pw@api.example.com/mcp?token=abc#frag").unwrap();
        let redacted = redact_url(&url);
        assert_eq!(redacted, "https://api.example.com/mcp?<redacted>");
        assert!(!redacted.contains("abc"));
        assert!(!redacted.contains("pw"));
    }

    #[test]
    fn test_policy_deserialize_defaults() {
        let policy: SsrfPolicy = serde_json::from_str("{}").unwrap();
        assert!(!policy.allow_loopback);
        assert!(!policy.allow_private);
        assert_eq!(policy.dns_timeout, DEFAULT_DNS_TIMEOUT);

        let policy: SsrfPolicy =
            serde_json::from_str(r#"{"allow_loopback":true,"dns_timeout":250}"#).unwrap();
        assert!(policy.allow_loopback);
        assert_eq!(policy.dns_timeout, Duration::from_millis(250));
    }
}
