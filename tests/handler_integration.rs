//! Structured report sources against mock APIs.

mod support;

use std::sync::Arc;
use std::time::Duration;

use report_crawler::download::RetryPolicy;
use report_crawler::handler::{
    EastmoneyApiSource, HandlerError, ReportSource, SourceError, StructuredApiHandler,
    TushareSource,
};
use report_crawler::{Category, TypeHandler};
use serde_json::json;
use support::mock_server_or_skip;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_eastmoney_macro_query_and_binary_urls() {
    let Some(server) = mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/report/jg"))
        .and(query_param("qType", "3"))
        .and(query_param("pageSize", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"title": "宏观经济月度跟踪报告", "publishDate": "2024-03-01 00:00:00.000", "infoCode": "AP202403011"},
                {"title": "海外宏观周度观察", "publishDate": "2024-03-02 00:00:00.000", "infoCode": ""}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let source = EastmoneyApiSource::with_base_url(server.uri())
        .unwrap()
        .with_min_interval(Duration::ZERO);
    let rows = source.fetch(Category::Macro, 2).await.unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0].reference,
        "https://pdf.dfcfw.com/pdf/H3_AP202403011_1.pdf"
    );
    assert!(rows[1].reference.is_empty());
}

#[tokio::test]
async fn test_eastmoney_handler_normalizes_dates() {
    let Some(server) = mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/report/list"))
        .and(query_param("qType", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"title": "个股深度研究报告第一篇", "publishDate": "2024-03-05 00:00:00.000", "infoCode": "AP1"}
            ]
        })))
        .mount(&server)
        .await;

    let source = EastmoneyApiSource::with_base_url(server.uri())
        .unwrap()
        .with_min_interval(Duration::ZERO);
    let handler = StructuredApiHandler::new(Category::Stock, Arc::new(source));
    let records = handler.list(None, 5).await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].published_date, "2024-03-05");
    assert_eq!(records[0].category, Category::Stock);
    assert_eq!(handler.source_reference().as_str(), "eastmoney://stock");
}

#[tokio::test]
async fn test_eastmoney_server_error_is_http_status() {
    let Some(server) = mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let source = EastmoneyApiSource::with_base_url(server.uri())
        .unwrap()
        .with_min_interval(Duration::ZERO);
    let err = source.fetch(Category::Industry, 3).await.unwrap_err();
    assert!(matches!(err, SourceError::HttpStatus { status: 503, .. }));
}

#[tokio::test]
async fn test_tushare_maps_columns_by_name() {
    let Some(server) = mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "api_name": "report_rc",
            "token": "secret-token",
            "params": {"limit": 2}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "msg": "",
            "data": {
                "fields": ["ts_code", "report_date", "report_title", "report_url"],
                "items": [
                    ["600000.SH", "20240301", "银行业深度研究报告", "https://example.com/a.pdf"],
                    ["000001.SZ", "20240302", "零售银行转型专题", null]
                ]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let source = TushareSource::with_base_url("secret-token", server.uri())
        .unwrap()
        .with_min_interval(Duration::ZERO);
    let rows = source.fetch(Category::Industry, 2).await.unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].title, "银行业深度研究报告");
    assert_eq!(rows[0].date, "20240301");
    assert_eq!(rows[0].reference, "https://example.com/a.pdf");
    assert!(rows[1].reference.is_empty());
}

#[tokio::test]
async fn test_tushare_quota_exhaustion_fails_category() {
    let Some(server) = mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 40203,
            "msg": "抱歉，您每分钟最多访问该接口2次",
            "data": null
        })))
        .expect(2)
        .mount(&server)
        .await;

    let source = TushareSource::with_base_url("secret-token", server.uri())
        .unwrap()
        .with_min_interval(Duration::ZERO);
    let handler =
        StructuredApiHandler::with_retry(Category::Macro, Arc::new(source), RetryPolicy::immediate(2));
    let err = handler.list(None, 3).await.unwrap_err();

    assert!(matches!(
        err,
        HandlerError::Source {
            category: Category::Macro,
            source: SourceError::RateLimited { .. },
        }
    ));
}

#[tokio::test]
async fn test_tushare_api_error_is_not_retried() {
    let Some(server) = mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": -2001,
            "msg": "token不对，请确认",
            "data": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let source = TushareSource::with_base_url("wrong", server.uri())
        .unwrap()
        .with_min_interval(Duration::ZERO);
    let handler =
        StructuredApiHandler::with_retry(Category::Strategy, Arc::new(source), RetryPolicy::immediate(3));
    let err = handler.list(None, 3).await.unwrap_err();
    assert!(matches!(
        err,
        HandlerError::Source {
            source: SourceError::Api { code: -2001, .. },
            ..
        }
    ));
}
