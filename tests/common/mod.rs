use bytes::{Buf, BufMut, Bytes, BytesMut};
use octopus::catalog::Catalog;
use octopus::{serve, Gateway};
use rusqlite::Connection;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

pub const SUPERUSER: &str = "octopus";
pub const PASSWORD: &str = "bitnine";

pub struct TestGateway {
    pub port: u16,
    #[allow(dead_code)]
    pub gateway: Gateway,
    #[allow(dead_code)]
    pub dir: TempDir,
    pub server_handle: tokio::task::JoinHandle<()>,
}

impl TestGateway {
    pub fn abort(self) {
        self.server_handle.abort();
    }
}

/// Start a gateway on an ephemeral port with one SQLite file per
/// `(name, ddl)` entry registered as a data source.
pub async fn start_gateway(max_connections: usize, sources: &[(&str, &str)]) -> TestGateway {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(Catalog::new(SUPERUSER, PASSWORD));
    for (name, ddl) in sources {
        let path = dir.path().join(format!("{name}.db"));
        Connection::open(&path).unwrap().execute_batch(ddl).unwrap();
        catalog.add_data_source(name, &path.display().to_string(), None).unwrap();
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let gateway = Gateway::new(catalog, max_connections);
    let server = gateway.clone();
    let server_handle = tokio::spawn(async move {
        let _ = serve(listener, server).await;
    });

    TestGateway {
        port,
        gateway,
        dir,
        server_handle,
    }
}

/// A bare protocol client, for flows the regular drivers do not produce.
#[allow(dead_code)]
pub struct RawClient {
    stream: TcpStream,
    buf: BytesMut,
}

#[allow(dead_code)]
impl RawClient {
    pub async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        RawClient {
            stream,
            buf: BytesMut::with_capacity(4096),
        }
    }

    pub async fn write(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn send_startup(&mut self, user: &str) {
        let mut params = BytesMut::new();
        params.put_slice(b"user\0");
        params.put_slice(user.as_bytes());
        params.put_slice(b"\0database\0octopus\0\0");
        let mut msg = BytesMut::new();
        msg.put_i32(8 + params.len() as i32);
        msg.put_i32(196608); // Protocol 3.0
        msg.put_slice(&params);
        self.write(&msg).await;
    }

    pub async fn send(&mut self, tag: u8, body: &[u8]) {
        let mut msg = BytesMut::new();
        msg.put_u8(tag);
        msg.put_i32(4 + body.len() as i32);
        msg.put_slice(body);
        self.write(&msg).await;
    }

    pub async fn password(&mut self, password: &str) {
        self.send(b'p', &cstr(password)).await;
    }

    /// Startup and password exchange. Returns the BackendKeyData secret.
    pub async fn login(&mut self, user: &str, password: &str) -> i32 {
        self.send_startup(user).await;
        let (tag, _) = self.read_message().await.unwrap();
        assert_eq!(tag, b'R');
        self.password(password).await;

        let mut secret = None;
        for (tag, mut body) in self.read_until_ready().await {
            match tag {
                b'K' => {
                    body.get_i32();
                    secret = Some(body.get_i32());
                }
                b'E' => panic!("login failed: {:?}", error_fields(&body)),
                _ => {}
            }
        }
        secret.expect("BackendKeyData")
    }

    pub async fn query(&mut self, sql: &str) {
        self.send(b'Q', &cstr(sql)).await;
    }

    pub async fn parse(&mut self, name: &str, sql: &str, param_types: &[i32]) {
        let mut body = BytesMut::new();
        body.put_slice(&cstr(name));
        body.put_slice(&cstr(sql));
        body.put_i16(param_types.len() as i16);
        for oid in param_types {
            body.put_i32(*oid);
        }
        self.send(b'P', &body).await;
    }

    /// Bind text parameters to the unnamed portal.
    pub async fn bind(&mut self, values: &[Option<&str>], result_formats: &[i16]) {
        let mut body = BytesMut::new();
        body.put_slice(b"\0\0");
        body.put_i16(0);
        body.put_i16(values.len() as i16);
        for value in values {
            match value {
                Some(v) => {
                    body.put_i32(v.len() as i32);
                    body.put_slice(v.as_bytes());
                }
                None => body.put_i32(-1),
            }
        }
        body.put_i16(result_formats.len() as i16);
        for format in result_formats {
            body.put_i16(*format);
        }
        self.send(b'B', &body).await;
    }

    pub async fn describe(&mut self, typ: u8) {
        self.send(b'D', &[typ, 0]).await;
    }

    pub async fn execute(&mut self, max_rows: i32) {
        let mut body = BytesMut::new();
        body.put_u8(0);
        body.put_i32(max_rows);
        self.send(b'E', &body).await;
    }

    pub async fn close(&mut self, typ: u8) {
        self.send(b'C', &[typ, 0]).await;
    }

    pub async fn sync(&mut self) {
        self.send(b'S', &[]).await;
    }

    pub async fn terminate(&mut self) {
        self.send(b'X', &[]).await;
    }

    /// Next backend message, or `None` once the server closed the socket.
    pub async fn read_message(&mut self) -> Option<(u8, Bytes)> {
        loop {
            if self.buf.len() >= 5 {
                let len = i32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
                if self.buf.len() >= len + 1 {
                    let tag = self.buf.get_u8();
                    self.buf.advance(4);
                    return Some((tag, self.buf.split_to(len - 4).freeze()));
                }
            }
            let n = timeout(Duration::from_secs(5), self.stream.read_buf(&mut self.buf))
                .await
                .expect("timed out waiting for the server")
                .unwrap_or(0);
            if n == 0 {
                return None;
            }
        }
    }

    pub async fn read_until_ready(&mut self) -> Vec<(u8, Bytes)> {
        let mut messages = Vec::new();
        while let Some((tag, body)) = self.read_message().await {
            if tag == b'Z' {
                return messages;
            }
            messages.push((tag, body));
        }
        panic!("connection closed before ReadyForQuery: {:?}", tags(&messages));
    }
}

#[allow(dead_code)]
pub fn cstr(s: &str) -> Vec<u8> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

#[allow(dead_code)]
pub fn tags(messages: &[(u8, Bytes)]) -> String {
    messages.iter().map(|(tag, _)| *tag as char).collect()
}

/// `(code, value)` pairs of an ErrorResponse body.
#[allow(dead_code)]
pub fn error_fields(body: &[u8]) -> Vec<(u8, String)> {
    let mut fields = Vec::new();
    let mut rest = body;
    while let Some((&code, tail)) = rest.split_first() {
        if code == 0 {
            break;
        }
        let end = tail.iter().position(|b| *b == 0).unwrap_or(tail.len());
        fields.push((code, String::from_utf8_lossy(&tail[..end]).into_owned()));
        rest = &tail[(end + 1).min(tail.len())..];
    }
    fields
}

#[allow(dead_code)]
pub fn error_field(body: &[u8], code: u8) -> Option<String> {
    error_fields(body).into_iter().find(|(c, _)| *c == code).map(|(_, v)| v)
}

/// Text values of a DataRow body.
#[allow(dead_code)]
pub fn data_row(mut body: Bytes) -> Vec<Option<String>> {
    let count = body.get_i16();
    (0..count)
        .map(|_| {
            let len = body.get_i32();
            (len >= 0).then(|| {
                let value = body.split_to(len as usize);
                String::from_utf8_lossy(&value).into_owned()
            })
        })
        .collect()
}

/// Column names of a RowDescription body.
#[allow(dead_code)]
pub fn column_names(mut body: Bytes) -> Vec<String> {
    let count = body.get_i16();
    (0..count)
        .map(|_| {
            let end = body.iter().position(|b| *b == 0).unwrap();
            let name = String::from_utf8_lossy(&body.split_to(end)).into_owned();
            body.advance(1 + 4 + 2 + 4 + 2 + 4 + 2);
            name
        })
        .collect()
}

#[allow(dead_code)]
pub fn command_tag(body: &Bytes) -> String {
    String::from_utf8_lossy(&body[..body.len().saturating_sub(1)]).into_owned()
}
