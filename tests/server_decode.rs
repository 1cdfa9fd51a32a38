
mod server_decode {
    use std::future::Future;

    use async_h1ws::{Request, Response};
    use futures_lite::io::AsyncWriteExt;
    use http_types::{StatusCode, Version};
    use pretty_assertions::assert_eq;

    use super::test_utils::TestIO;

    /// Feed `input` to a server, hang up, and return everything it wrote.
    async fn serve<F, Fut>(input: &str, endpoint: F) -> String
    where
        F: Fn(Request) -> Fut + Send + Sync,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let (mut client, server) = TestIO::new();
        client.write_all(input.as_bytes()).await.unwrap();
        client.close();
        async_h1ws::server::accept(server, endpoint).await.ok();
        client.received()
    }

    async fn ok(_req: Request) -> Response {
        Response::new(StatusCode::Ok)
    }

    #[async_std::test]
    async fn post_with_body() {
        let output = serve(
            "POST / HTTP/1.1\r\n\
             host: localhost:8080\r\n\
             content-length: 5\r\n\
             another-header: header value\r\n\
             another-header: other header value\r\n\
             \r\n\
             hello",
            |mut req: Request| async move {
                assert_eq!(req.method(), "POST");
                assert_eq!(req.version(), Version::Http1_1);
                assert_eq!(req.url().as_str(), "http://localhost:8080/");
                let values: Vec<_> = req.header("Another-Header").unwrap().iter().collect();
                assert_eq!(values, ["header value", "other header value"]);

                let body = req.body_string().await.unwrap();
                let mut res = Response::new(StatusCode::Ok);
                res.set_body(format!("got {}", body));
                res
            },
        )
        .await;

        assert!(output.starts_with("HTTP/1.1 200 OK\r\n"), "{}", output);
        assert!(output.contains("Content-Length: 9\r\n"));
        assert!(output.ends_with("\r\n\r\ngot hello"));
    }

    #[async_std::test]
    async fn chunked_with_trailers() {
        let output = serve(
            "POST /upload HTTP/1.1\r\n\
             host: localhost\r\n\
             transfer-encoding: chunked\r\n\
             \r\n\
             1\r\nh\r\n\
             1\r\ne\r\n\
             3;name=value\r\nllo\r\n\
             0\r\n\
             x-checksum: abc\r\n\
             \r\n",
            |mut req: Request| async move {
                assert!(req.is_chunked());
                let body = req.body_string().await.unwrap();
                let mut res = Response::new(StatusCode::Ok);
                res.set_body(format!(
                    "{} {}",
                    body,
                    req.header("x-checksum").map_or("none", |values| values.as_str())
                ));
                res
            },
        )
        .await;

        assert!(output.ends_with("\r\n\r\nhello abc"), "{}", output);
    }

    #[async_std::test]
    async fn absolute_form_targets() {
        let output = serve(
            "GET http://example.com/a?b=c HTTP/1.1\r\nhost: localhost\r\n\r\n",
            |req: Request| async move {
                let mut res = Response::new(StatusCode::Ok);
                res.set_body(req.url().to_string());
                res
            },
        )
        .await;
        assert!(output.ends_with("http://example.com/a?b=c"), "{}", output);
    }

    #[async_std::test]
    async fn http_1_0_needs_no_host() {
        let output = serve("GET /old HTTP/1.0\r\n\r\n", ok).await;
        assert!(output.starts_with("HTTP/1.0 200 OK\r\n"), "{}", output);
        assert!(output.contains("Connection: close\r\n"));
    }

    #[async_std::test]
    async fn rejects_bad_requests() {
        let cases = [
            ("GET / HTTP/1.1\r\n\r\n", "400 Bad Request"),
            (
                "POST / HTTP/1.1\r\nhost: a\r\ncontent-length: 1\r\ncontent-length: 2\r\n\r\n",
                "400 Bad Request",
            ),
            (
                "POST / HTTP/1.1\r\nhost: a\r\ncontent-length: 5\r\ntransfer-encoding: chunked\r\n\r\n",
                "400 Bad Request",
            ),
            (
                "POST / HTTP/1.1\r\nhost: a\r\ntransfer-encoding: gzip\r\n\r\n",
                "501 Not Implemented",
            ),
            ("POST / HTTP/1.1\r\nhost: a\r\n\r\n", "411 Length Required"),
            ("GET / HTTP/2.0\r\nhost: a\r\n\r\n", "505 HTTP Version Not Supported"),
            ("GET / HTTP/1.1\r\nno colon here\r\n\r\n", "400 Bad Request"),
            ("GET / HTTP/1.1\rhost: a\r\n\r\n", "400 Bad Request"),
        ];

        for (input, status) in cases {
            let output = serve(input, ok).await;
            assert!(
                output.starts_with(&format!("HTTP/1.1 {}\r\n", status)),
                "{:?} gave {}",
                input,
                output
            );
            assert!(output.contains("Connection: close\r\n"), "{}", output);
        }
    }

    #[async_std::test]
    async fn head_too_large() {
        let input = format!(
            "GET / HTTP/1.1\r\nhost: a\r\nx-big: {}\r\n\r\n",
            "a".repeat(40 * 1024)
        );
        let output = serve(&input, ok).await;
        assert!(output.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{}", output);
    }

    #[async_std::test]
    async fn silent_on_truncated_heads() {
        let output = serve("GET / HTTP/1.1\r\nhost: a\r\n", ok).await;
        assert_eq!(output, "");
    }

    #[async_std::test]
    async fn blank_lines_then_eof_close_quietly() {
        let (mut client, server) = TestIO::new();
        client.write_all(b"\r\n\r\n").await.unwrap();
        client.close();
        assert!(async_h1ws::server::accept(server, ok).await.is_ok());
        assert_eq!(client.received(), "");
    }
}
