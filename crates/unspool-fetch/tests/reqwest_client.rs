#![cfg(feature = "reqwest")]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread;

use unspool_fetch::{FetchError, Fetcher, ReqwestClient};

/// Serve one canned response per connection, `responses.len()` times.
fn serve(responses: Vec<String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        for response in responses {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            stream.write_all(response.as_bytes()).unwrap();
        }
    });

    format!("http://{addr}")
}

fn fetcher() -> Fetcher<ReqwestClient> {
    let client = reqwest::blocking::Client::builder()
        .no_proxy()
        .build()
        .unwrap();
    Fetcher::new(ReqwestClient::from_client(client))
}

#[test]
fn body_and_headers_are_exposed() {
    let base = serve(vec![
        "HTTP/1.1 200 OK\r\n\
         Content-Length: 5\r\n\
         Content-Disposition: attachment; filename=\"hello.txt\"\r\n\
         Connection: close\r\n\r\n\
         hello"
            .to_string(),
    ]);

    let mut download = fetcher().fetch(&format!("{base}/download")).unwrap();
    let mut body = String::new();
    download.body.read_to_string(&mut body).unwrap();

    assert_eq!(body, "hello");
    assert_eq!(download.content_length, Some(5));
    assert_eq!(download.infer_name().as_deref(), Some("hello.txt"));
}

#[test]
fn redirect_is_followed_and_final_url_named() {
    let base = serve(vec![
        "HTTP/1.1 302 Found\r\n\
         Location: /files/tool.tar.gz\r\n\
         Content-Length: 0\r\n\
         Connection: close\r\n\r\n"
            .to_string(),
        "HTTP/1.1 200 OK\r\n\
         Content-Length: 2\r\n\
         Connection: close\r\n\r\n\
         ok"
            .to_string(),
    ]);

    let download = fetcher().fetch(&format!("{base}/latest")).unwrap();
    assert!(download.final_url.ends_with("/files/tool.tar.gz"));
    assert_eq!(download.infer_name().as_deref(), Some("tool.tar.gz"));
}

#[test]
fn not_found_is_status_error() {
    let base = serve(vec![
        "HTTP/1.1 404 Not Found\r\n\
         Content-Length: 0\r\n\
         Connection: close\r\n\r\n"
            .to_string(),
    ]);

    let err = fetcher().fetch(&format!("{base}/missing")).err().unwrap();
    assert!(matches!(err, FetchError::Status { status: 404, .. }));
    assert_eq!(err.to_string(), "http error: 404 Not Found");
}
