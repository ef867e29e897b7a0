use serde::Deserialize;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Control-plane route answering partition replica queries.
pub const ADMIN_GET_DATA_PARTITION: &str = "admin/getDataPartition";

const MASTER_HTTP_DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RESPONSE_HEADER_BYTES: usize = 64 * 1024;
const MAX_RESPONSE_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Control-plane view of one partition. Element 0 of `hosts` is the
/// authoritative leader address.
#[derive(Debug, Clone, Deserialize)]
pub struct DataPartitionView {
    #[serde(rename = "PartitionID", default)]
    pub partition_id: u64,
    #[serde(rename = "ReplicaNum", default)]
    pub replica_num: u8,
    #[serde(rename = "Hosts", default)]
    pub hosts: Vec<String>,
}

/// Seam towards the cluster control plane ("master").
pub trait MasterClient: Send + Sync {
    fn get_data_partition(&self, partition_id: u64) -> Result<DataPartitionView, MasterError>;
}

/// Plain HTTP/1.1 implementation of [`MasterClient`].
#[derive(Debug)]
pub struct HttpMasterClient {
    base: Url,
    host: String,
    port: u16,
    authority: String,
    timeout: Duration,
}

impl HttpMasterClient {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, MasterError> {
        let url = Url::parse(base_url.as_ref())?;
        if url.scheme() != "http" {
            return Err(MasterError::UnsupportedScheme {
                scheme: url.scheme().to_string(),
            });
        }
        let host = url.host_str().ok_or(MasterError::MissingHost)?.to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let authority = if port == 80 {
            host.clone()
        } else {
            format!("{host}:{port}")
        };
        Ok(Self {
            base: ensure_trailing_slash(url),
            host,
            port,
            authority,
            timeout: MASTER_HTTP_DEFAULT_TIMEOUT,
        })
    }

    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(Duration::from_millis(1));
        self
    }

    fn get(&self, path: &str) -> Result<Vec<u8>, MasterError> {
        let mut stream = self.open_stream()?;
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nAccept: application/json\r\nConnection: close\r\n\r\n",
            self.build_url(path)?,
            self.authority,
        );
        stream.write_all(request.as_bytes()).map_err(map_io_error)?;
        stream.flush().map_err(map_io_error)?;
        let (status, body) = read_http_response(&mut stream)?;
        if status != 200 {
            return Err(MasterError::UnexpectedStatus { status });
        }
        Ok(body)
    }

    fn open_stream(&self) -> Result<TcpStream, MasterError> {
        let target = format!("{}:{}", self.host, self.port);
        let addrs: Vec<SocketAddr> = target.to_socket_addrs()?.collect();
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(MasterError::Io(last_err.unwrap_or_else(|| {
            io::Error::other("no control-plane addresses resolved")
        })))
    }

    fn build_url(&self, path: &str) -> Result<String, MasterError> {
        let trimmed = path.trim_start_matches('/');
        let relative = if trimmed.is_empty() { "." } else { trimmed };
        let resolved = self.base.join(relative)?;
        let mut result = resolved.path().to_string();
        if result.is_empty() {
            result.push('/');
        }
        if let Some(query) = resolved.query() {
            result.push('?');
            result.push_str(query);
        }
        Ok(result)
    }
}

impl MasterClient for HttpMasterClient {
    fn get_data_partition(&self, partition_id: u64) -> Result<DataPartitionView, MasterError> {
        let path = format!("{ADMIN_GET_DATA_PARTITION}?id={partition_id}");
        let body = self.get(&path)?;
        serde_json::from_slice(&body).map_err(MasterError::Decode)
    }
}

fn read_http_response(stream: &mut impl Read) -> Result<(u16, Vec<u8>), MasterError> {
    let mut buffer = Vec::new();
    let mut header_end = None;
    let mut temp = [0u8; 1024];
    while header_end.is_none() {
        let read = stream.read(&mut temp).map_err(map_io_error)?;
        if read == 0 {
            return Err(MasterError::ResponseParse);
        }
        buffer.extend_from_slice(&temp[..read]);
        if buffer.len() > MAX_RESPONSE_HEADER_BYTES {
            return Err(MasterError::HeadersTooLarge);
        }
        if let Some(pos) = find_header_terminator(&buffer) {
            header_end = Some(pos + 4);
        }
    }
    let header_len = header_end.ok_or(MasterError::ResponseParse)?;
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(&buffer) {
        Ok(httparse::Status::Complete(_)) => {}
        _ => return Err(MasterError::ResponseParse),
    }
    let status = response.code.ok_or(MasterError::ResponseParse)?;
    let mut content_length: Option<usize> = None;
    for header in response.headers.iter() {
        if header.name.eq_ignore_ascii_case("Content-Length") {
            let value =
                std::str::from_utf8(header.value).map_err(|_| MasterError::ResponseParse)?;
            content_length = Some(value.parse().map_err(|_| MasterError::ResponseParse)?);
        }
    }
    let len = content_length.ok_or(MasterError::MissingContentLength)?;
    if len > MAX_RESPONSE_BODY_BYTES {
        return Err(MasterError::BodyTooLarge);
    }
    let mut body = Vec::with_capacity(len);
    let already = buffer.len() - header_len;
    if already > 0 {
        let copy_len = already.min(len);
        body.extend_from_slice(&buffer[header_len..header_len + copy_len]);
    }
    while body.len() < len {
        let read = stream.read(&mut temp).map_err(map_io_error)?;
        if read == 0 {
            return Err(MasterError::TruncatedBody);
        }
        let remaining = len - body.len();
        body.extend_from_slice(&temp[..read.min(remaining)]);
    }
    Ok((status, body))
}

fn find_header_terminator(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

fn map_io_error(err: io::Error) -> MasterError {
    if matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    ) {
        MasterError::Timeout
    } else {
        MasterError::Io(err)
    }
}

fn ensure_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
    url
}

#[derive(Debug, Error)]
pub enum MasterError {
    #[error("invalid control-plane endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("unsupported control-plane scheme: {scheme}")]
    UnsupportedScheme { scheme: String },
    #[error("control-plane endpoint has no host")]
    MissingHost,
    #[error("control-plane I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("control-plane request timed out")]
    Timeout,
    #[error("unexpected control-plane status: {status}")]
    UnexpectedStatus { status: u16 },
    #[error("malformed control-plane response")]
    ResponseParse,
    #[error("control-plane response headers too large")]
    HeadersTooLarge,
    #[error("control-plane response missing content length")]
    MissingContentLength,
    #[error("control-plane response body too large")]
    BodyTooLarge,
    #[error("control-plane response body truncated")]
    TruncatedBody,
    #[error("control-plane decode error: {0}")]
    Decode(serde_json::Error),
}
