//! Integration tests for feed queries over real HTTP.
//!
//! Each test starts its own wiremock server serving Atom fixtures and drives
//! the public client API against it through `HttpTransport`.

use futures::TryStreamExt;
use nufeed::feed::{
    ClientOptions, EngineOptions, FeedClient, FeedCredentials, FeedSource, ListOptions,
    PackageIdentity, SearchFilter,
};
use nufeed::transport::{HttpTransport, HttpTransportOptions};
use nufeed::{FeedError, NuGetVersion};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, header_exists, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FIND_PATH: &str = "/api/v2/FindPackagesById()";

fn client() -> FeedClient {
    let transport = HttpTransport::new(reqwest::Client::new(), HttpTransportOptions::default());
    FeedClient::new(
        Arc::new(transport),
        ClientOptions {
            engine: EngineOptions {
                retry_delay: Duration::ZERO,
                ..EngineOptions::default()
            },
            ..ClientOptions::default()
        },
    )
}

fn source(server: &MockServer) -> FeedSource {
    FeedSource::new(&format!("{}/api/v2/", server.uri())).unwrap()
}

fn entry(id: &str, version: &str) -> String {
    format!(
        r#"<entry>
  <id>https://feed.example/api/v2/Packages(Id='{id}',Version='{version}')</id>
  <title type="text">{id}</title>
  <summary type="text">Summary of {id}</summary>
  <author><name>Example Author</name></author>
  <content type="application/zip" src="https://feed.example/api/v2/package/{id}/{version}"/>
  <m:properties>
    <d:Id>{id}</d:Id>
    <d:Version>{version}</d:Version>
    <d:Published m:type="Edm.DateTime">2023-03-08T12:00:00</d:Published>
    <d:DownloadCount m:type="Edm.Int32">42</d:DownloadCount>
  </m:properties>
</entry>"#
    )
}

fn page(entries: &[String], next: Option<&str>) -> String {
    let link = next
        .map(|n| format!(r#"<link rel="next" href="{}"/>"#, n.replace('&', "&amp;")))
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<feed xml:base="https://feed.example/api/v2" xmlns="http://www.w3.org/2005/Atom" xmlns:d="http://schemas.microsoft.com/ado/2007/08/dataservices" xmlns:m="http://schemas.microsoft.com/ado/2007/08/dataservices/metadata">
<title type="text">Packages</title>
{}
{}
</feed>"#,
        entries.join("\n"),
        link
    )
}

fn atom(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "application/atom+xml")
        .set_body_string(body)
}

// ============================================================================
// findById Tests
// ============================================================================

#[tokio::test]
async fn test_find_by_id_follows_two_pages() {
    let server = MockServer::start().await;
    let next = format!(
        "{}{}?id='Newtonsoft.Json'&$skiptoken='Newtonsoft.Json','9.0.29'",
        server.uri(),
        FIND_PATH
    );

    let first: Vec<String> = (0..30)
        .map(|i| entry("Newtonsoft.Json", &format!("{}.0.{}", 1 + i / 10, i % 10)))
        .collect();
    let second: Vec<String> = (0..5)
        .map(|i| entry("Newtonsoft.Json", &format!("{}.0.0-beta{}", 10 + i, i)))
        .collect();

    Mock::given(method("GET"))
        .and(path(FIND_PATH))
        .and(query_param("$skiptoken", "'Newtonsoft.Json','9.0.29'"))
        .respond_with(atom(page(&second, None)))
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FIND_PATH))
        .and(query_param("id", "'Newtonsoft.Json'"))
        .respond_with(atom(page(&first, Some(&next))))
        .expect(1)
        .mount(&server)
        .await;

    let results = client()
        .engine()
        .find_by_id(
            &source(&server),
            "Newtonsoft.Json",
            true,
            true,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 35);
    let identities: HashSet<&PackageIdentity> = results.iter().map(|e| &e.identity).collect();
    assert_eq!(identities.len(), 35);
    assert!(results
        .windows(2)
        .all(|pair| pair[0].version() > pair[1].version()));
    assert_eq!(results[0].version().to_string(), "14.0.0-beta4");
    assert_eq!(results[34].version().to_string(), "1.0.0");
}

#[tokio::test]
async fn test_find_by_id_stops_on_self_link() {
    let server = MockServer::start().await;
    let second_url = format!("{}{}?id='A'&$skiptoken='A','1.0.0'", server.uri(), FIND_PATH);

    Mock::given(method("GET"))
        .and(path(FIND_PATH))
        .and(query_param("$skiptoken", "'A','1.0.0'"))
        .respond_with(atom(page(&[entry("A", "2.0.0")], Some(&second_url))))
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FIND_PATH))
        .respond_with(atom(page(&[entry("A", "1.0.0")], Some(&second_url))))
        .expect(1)
        .mount(&server)
        .await;

    let results = client()
        .engine()
        .find_by_id(&source(&server), "A", false, false, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn test_find_by_id_retries_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FIND_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FIND_PATH))
        .respond_with(atom(page(&[entry("A", "1.0.0"), entry("A", "2.0.0")], None)))
        .expect(1)
        .mount(&server)
        .await;

    let results = client()
        .engine()
        .find_by_id(&source(&server), "A", false, false, &CancellationToken::new())
        .await
        .unwrap();
    let versions: Vec<String> = results.iter().map(|e| e.version().to_string()).collect();
    assert_eq!(versions, vec!["2.0.0", "1.0.0"]);
}

#[tokio::test]
async fn test_find_by_id_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FIND_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let err = client()
        .engine()
        .find_by_id(&source(&server), "A", false, false, &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        FeedError::Fatal { url, .. } => assert!(url.contains("FindPackagesById")),
        other => panic!("Expected Fatal, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unparsable_version_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FIND_PATH))
        .respond_with(atom(page(&[entry("A", "not-a-version")], None)))
        .expect(1)
        .mount(&server)
        .await;

    let err = client()
        .engine()
        .find_by_id(&source(&server), "A", true, true, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FeedError::MalformedEntry { .. }));
}

#[tokio::test]
async fn test_missing_optional_fields_are_tolerated() {
    let server = MockServer::start().await;
    let bare = r#"<entry><title>A</title><m:properties><d:Version>1.0.0</d:Version></m:properties></entry>"#;
    Mock::given(method("GET"))
        .and(path(FIND_PATH))
        .respond_with(atom(page(&[bare.to_string()], None)))
        .mount(&server)
        .await;

    let results = client()
        .engine()
        .find_by_id(&source(&server), "A", true, true, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id(), "A");
    assert!(results[0].summary.is_none());
    assert!(results[0].download_count.is_none());
}

#[tokio::test]
async fn test_service_document_base_is_used() {
    let server = MockServer::start().await;
    let service = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><service xml:base="{}/nuget/" xmlns="http://www.w3.org/2007/app"><workspace/></service>"#,
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/api/v2/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(service))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nuget/FindPackagesById()"))
        .respond_with(atom(page(&[entry("A", "1.0.0")], None)))
        .expect(1..)
        .mount(&server)
        .await;

    let client = client();
    let source = source(&server);
    let cancel = CancellationToken::new();
    for include_prerelease in [false, true] {
        let results = client
            .engine()
            .find_by_id(&source, "A", false, include_prerelease, &cancel)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }
}

// ============================================================================
// Multi-feed Tests
// ============================================================================

#[tokio::test]
async fn test_same_query_on_two_feeds_is_not_shared() {
    let feed_a = MockServer::start().await;
    let feed_b = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FIND_PATH))
        .respond_with(atom(page(&[entry("Shared", "1.0.0")], None)))
        .mount(&feed_a)
        .await;
    Mock::given(method("GET"))
        .and(path(FIND_PATH))
        .respond_with(atom(page(&[entry("Shared", "9.9.9")], None)))
        .expect(1)
        .mount(&feed_b)
        .await;

    let client = client();
    let cancel = CancellationToken::new();
    let from_a = client
        .engine()
        .find_by_id(&source(&feed_a), "Shared", true, true, &cancel)
        .await
        .unwrap();
    let from_b = client
        .engine()
        .find_by_id(&source(&feed_b), "Shared", true, true, &cancel)
        .await
        .unwrap();

    assert_eq!(from_a[0].version().to_string(), "1.0.0");
    assert_eq!(from_b.len(), 1);
    assert_eq!(from_b[0].version().to_string(), "9.9.9");
}

#[tokio::test]
async fn test_credentials_follow_their_source() {
    let private = MockServer::start().await;
    let public = MockServer::start().await;
    // "alice:one" base64-encoded
    Mock::given(method("GET"))
        .and(path(FIND_PATH))
        .and(header("authorization", "Basic YWxpY2U6b25l"))
        .respond_with(atom(page(&[entry("A", "1.0.0")], None)))
        .expect(1)
        .mount(&private)
        .await;
    Mock::given(method("GET"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(1)
        .mount(&public)
        .await;
    Mock::given(method("GET"))
        .and(path(FIND_PATH))
        .respond_with(atom(page(&[entry("A", "2.0.0")], None)))
        .expect(1)
        .mount(&public)
        .await;

    let client = client();
    let cancel = CancellationToken::new();
    let private_source = source(&private).with_credentials(FeedCredentials::new("alice", "one"));

    let from_private = client
        .engine()
        .find_by_id(&private_source, "A", true, true, &cancel)
        .await
        .unwrap();
    let from_public = client
        .engine()
        .find_by_id(&source(&public), "A", true, true, &cancel)
        .await
        .unwrap();

    assert_eq!(from_private[0].version().to_string(), "1.0.0");
    assert_eq!(from_public[0].version().to_string(), "2.0.0");
}

// ============================================================================
// getExact Tests
// ============================================================================

#[tokio::test]
async fn test_get_exact_falls_back_to_find_by_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/v2/Packages\("))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FIND_PATH))
        .respond_with(atom(page(
            &[entry("A", "1.0.0"), entry("A", "1.5.0"), entry("A", "2.0.0")],
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let identity = PackageIdentity::new("a", "1.5".parse::<NuGetVersion>().unwrap());
    let found = client()
        .engine()
        .get_exact(&source(&server), &identity, &CancellationToken::new())
        .await
        .unwrap()
        .expect("fallback should find the version");
    assert_eq!(found.version().to_string(), "1.5.0");
}

#[tokio::test]
async fn test_get_exact_direct_hit_skips_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/v2/Packages\("))
        .respond_with(atom(page(&[entry("A", "2.0.0")], None)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FIND_PATH))
        .respond_with(atom(page(&[], None)))
        .expect(0)
        .mount(&server)
        .await;

    let identity = PackageIdentity::new("A", "2.0.0".parse::<NuGetVersion>().unwrap());
    let found = client()
        .engine()
        .get_exact(&source(&server), &identity, &CancellationToken::new())
        .await
        .unwrap();
    assert!(found.is_some());
}

#[tokio::test]
async fn test_get_exact_missing_everywhere_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FIND_PATH))
        .respond_with(atom(page(&[entry("A", "1.0.0")], None)))
        .mount(&server)
        .await;

    let identity = PackageIdentity::new("A", "3.0.0".parse::<NuGetVersion>().unwrap());
    let found = client()
        .engine()
        .get_exact(&source(&server), &identity, &CancellationToken::new())
        .await
        .unwrap();
    assert!(found.is_none());
}

// ============================================================================
// Listing Tests
// ============================================================================

const METADATA: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<edmx:Edmx Version="1.0" xmlns:edmx="http://schemas.microsoft.com/ado/2007/06/edmx">
  <edmx:DataServices>
    <Schema xmlns="http://schemas.microsoft.com/ado/2006/04/edm">
      <EntityType Name="V2FeedPackage">
        <Property Name="Id" Type="Edm.String"/>
        <Property Name="IsAbsoluteLatestVersion" Type="Edm.Boolean"/>
      </EntityType>
      <EntityContainer Name="FeedContext">
        <FunctionImport Name="Search" EntitySet="Packages"/>
      </EntityContainer>
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#;

#[tokio::test]
async fn test_list_pages_through_search_and_keeps_latest_per_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/$metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_string(METADATA))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/Search()"))
        .and(query_param("$skip", "0"))
        .and(query_param("$filter", "IsLatestVersion"))
        .respond_with(atom(page(
            &[entry("A", "1.0.0"), entry("A", "1.1.0"), entry("B", "1.0.0")],
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/Search()"))
        .and(query_param("$skip", "3"))
        .respond_with(atom(page(&[entry("C", "0.1.0")], None)))
        .expect(1)
        .mount(&server)
        .await;

    let mut options = ListOptions::new("json");
    options.take = 3;
    let client = client();
    let entries: Vec<_> = client
        .lister()
        .list(source(&server), options, CancellationToken::new())
        .try_collect()
        .await
        .unwrap();

    let listed: Vec<String> = entries.iter().map(|e| e.identity.to_string()).collect();
    assert_eq!(listed, vec!["A 1.1.0", "B 1.0.0", "C 0.1.0"]);
}

#[tokio::test]
async fn test_list_uses_absolute_latest_for_prerelease() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/$metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_string(METADATA))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/Search()"))
        .and(query_param("$filter", "IsAbsoluteLatestVersion"))
        .and(query_param("includePrerelease", "true"))
        .respond_with(atom(page(&[entry("A", "2.0.0-rc.1")], None)))
        .expect(1)
        .mount(&server)
        .await;

    let mut options = ListOptions::new("");
    options.filter = SearchFilter::new(true);
    let entries: Vec<_> = client()
        .lister()
        .list(source(&server), options, CancellationToken::new())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].version().is_prerelease());
}

#[tokio::test]
async fn test_list_without_metadata_uses_raw_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/Packages()"))
        .and(query_param("$skip", "0"))
        .respond_with(atom(page(
            &[entry("Json.Tools", "1.0.0"), entry("Other", "1.0.0")],
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let entries: Vec<_> = client()
        .lister()
        .list(source(&server), ListOptions::new("json"), CancellationToken::new())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id(), "Json.Tools");
}

#[tokio::test]
async fn test_cancelled_query_reports_cancellation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(atom(page(&[], None)))
        .expect(0)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = client()
        .engine()
        .find_by_id(&source(&server), "A", false, false, &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}
