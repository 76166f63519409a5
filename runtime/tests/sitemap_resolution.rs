use a11y_audit::acquisition::http_client::HttpClient;
use a11y_audit::cartography::sitemap::resolve_sitemap;
use a11y_audit::error::PipelineError;
use std::collections::HashSet;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn urlset(locs: &[String]) -> String {
    let entries: String = locs
        .iter()
        .map(|l| format!("<url><loc>{l}</loc></url>"))
        .collect();
    format!(r#"<?xml version="1.0"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{entries}</urlset>"#)
}

fn index(locs: &[&str]) -> String {
    let entries: String = locs
        .iter()
        .map(|l| format!("<sitemap><loc>{l}</loc></sitemap>"))
        .collect();
    format!(r#"<?xml version="1.0"?><sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{entries}</sitemapindex>"#)
}

async fn serve(server: &MockServer, at: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn stops_fetching_once_max_pages_reached() {
    let server = MockServer::start().await;
    let base = server.uri();

    serve(&server, "/sitemap.xml", index(&["/s1.xml", "/s2.xml"])).await;
    let s1: Vec<String> = (1..=5).map(|i| format!("{base}/page-{i}")).collect();
    serve(&server, "/s1.xml", urlset(&s1)).await;
    // S2 must never be requested.
    Mock::given(method("GET"))
        .and(path("/s2.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(urlset(&[])))
        .expect(0)
        .mount(&server)
        .await;

    let client = HttpClient::new().unwrap();
    let urls = resolve_sitemap(&client, &format!("{base}/sitemap.xml"), 3)
        .await
        .unwrap();

    let got: Vec<String> = urls.iter().map(|u| u.to_string()).collect();
    assert_eq!(got, s1[..3].to_vec());
    server.verify().await;
}

#[tokio::test]
async fn overlapping_sitemaps_dedupe_and_stop_at_max_pages() {
    let server = MockServer::start().await;
    let base = server.uri();
    let u = |n: u32| format!("{base}/u{n}");

    serve(&server, "/sitemap.xml", index(&["/s1.xml", "/s2.xml", "/s3.xml"])).await;
    serve(&server, "/s1.xml", urlset(&[u(1), u(2)])).await;
    serve(&server, "/s2.xml", urlset(&[u(2), u(3)])).await;
    Mock::given(method("GET"))
        .and(path("/s3.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(urlset(&[u(4)])))
        .expect(0)
        .mount(&server)
        .await;

    let client = HttpClient::new().unwrap();
    let urls = resolve_sitemap(&client, &format!("{base}/sitemap.xml"), 3)
        .await
        .unwrap();

    let got: Vec<String> = urls.iter().map(|u| u.to_string()).collect();
    assert_eq!(got, vec![u(1), u(2), u(3)]);
    server.verify().await;
}

#[tokio::test]
async fn index_cycle_terminates() {
    let server = MockServer::start().await;
    let base = server.uri();

    serve(&server, "/a.xml", index(&["/b.xml", "/leaf.xml"])).await;
    serve(&server, "/b.xml", index(&["/a.xml", "/b.xml"])).await;
    serve(&server, "/leaf.xml", urlset(&[format!("{base}/only")])).await;

    let client = HttpClient::new().unwrap();
    let urls = resolve_sitemap(&client, &format!("{base}/a.xml"), 50)
        .await
        .unwrap();
    assert_eq!(urls.len(), 1);
    assert_eq!(urls[0].path(), "/only");

    let requests = server.received_requests().await.unwrap();
    let a_fetches = requests.iter().filter(|r| r.url.path() == "/a.xml").count();
    assert_eq!(a_fetches, 1);
}

#[tokio::test]
async fn duplicates_and_bad_locations_are_dropped() {
    let server = MockServer::start().await;
    let base = server.uri();

    serve(&server, "/sitemap.xml", index(&["/one.xml", "/two.xml"])).await;
    serve(
        &server,
        "/one.xml",
        urlset(&[
            format!("{base}/a"),
            format!("{base}/b#section"),
            "/relative".to_string(),
            "mailto:x@example.com".to_string(),
        ]),
    )
    .await;
    serve(
        &server,
        "/two.xml",
        urlset(&[format!("{base}/a"), format!("{base}/b"), format!("{base}/c")]),
    )
    .await;

    let client = HttpClient::new().unwrap();
    let urls = resolve_sitemap(&client, &format!("{base}/sitemap.xml"), 10)
        .await
        .unwrap();

    let paths: Vec<&str> = urls.iter().map(|u| u.path()).collect();
    assert_eq!(paths, vec!["/a", "/b", "/c"]);
    let unique: HashSet<_> = urls.iter().collect();
    assert_eq!(unique.len(), urls.len());
}

#[tokio::test]
async fn root_failure_is_fatal_but_nested_failure_is_skipped() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/missing.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    serve(&server, "/sitemap.xml", index(&["/missing.xml", "/ok.xml"])).await;
    serve(&server, "/ok.xml", urlset(&[format!("{base}/kept")])).await;

    let client = HttpClient::new().unwrap();

    let err = resolve_sitemap(&client, &format!("{base}/missing.xml"), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Fetch { .. }));
    assert!(err.to_string().contains("404"));

    let urls = resolve_sitemap(&client, &format!("{base}/sitemap.xml"), 10)
        .await
        .unwrap();
    assert_eq!(urls.len(), 1);
    assert_eq!(urls[0].path(), "/kept");
}

#[tokio::test]
async fn malformed_root_is_a_parse_error() {
    let server = MockServer::start().await;
    serve(&server, "/sitemap.xml", "<html><body>nope</body></html>".to_string()).await;

    let client = HttpClient::new().unwrap();
    let err = resolve_sitemap(&client, &format!("{}/sitemap.xml", server.uri()), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Parse { .. }));
}

#[tokio::test]
async fn empty_sitemap_resolves_to_nothing() {
    let server = MockServer::start().await;
    serve(&server, "/sitemap.xml", urlset(&[])).await;

    let client = HttpClient::new().unwrap();
    let urls = resolve_sitemap(&client, &format!("{}/sitemap.xml", server.uri()), 10)
        .await
        .unwrap();
    assert!(urls.is_empty());
}

#[tokio::test]
async fn zero_max_pages_fetches_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(urlset(&[])))
        .expect(0)
        .mount(&server)
        .await;

    let client = HttpClient::new().unwrap();
    let urls = resolve_sitemap(&client, &format!("{}/sitemap.xml", server.uri()), 0)
        .await
        .unwrap();
    assert!(urls.is_empty());
    server.verify().await;
}
