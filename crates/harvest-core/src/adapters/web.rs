//! Web page adapter
//!
//! Paginated listing pages. The cursor is a 1-based page number appended as
//! `page`/`per_page` query parameters; records are extracted from `<table>`
//! rows (cells become `column_N` fields). Web rows carry no source-native
//! identifiers, so change detection for these sources falls back to
//! whole-snapshot comparison.

use async_trait::async_trait;
use harvest_common::types::{Page, RawRecord};
use harvest_common::FetchError;
use scraper::{Html, Selector};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use super::{AdapterSettings, Fetcher, SourceAdapter};

pub struct WebAdapter {
    url: Url,
    fetcher: Arc<Fetcher>,
    settings: AdapterSettings,
}

impl WebAdapter {
    pub fn new(url: Url, fetcher: Arc<Fetcher>, settings: AdapterSettings) -> Self {
        Self {
            url,
            fetcher,
            settings,
        }
    }

    fn page_url(&self, page: usize) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &self.settings.page_size.to_string());
        url
    }
}

/// Extract table rows from the page. Kept synchronous: `scraper::Html` is
/// not `Send` and must not live across an await point.
fn parse_tables(html: &str) -> Result<Vec<RawRecord>, FetchError> {
    let document = Html::parse_document(html);
    let table_sel =
        Selector::parse("table").map_err(|e| FetchError::Malformed(format!("selector: {}", e)))?;
    let row_sel =
        Selector::parse("tr").map_err(|e| FetchError::Malformed(format!("selector: {}", e)))?;
    let cell_sel = Selector::parse("td, th")
        .map_err(|e| FetchError::Malformed(format!("selector: {}", e)))?;

    let mut records = Vec::new();
    for table in document.select(&table_sel) {
        // First row is the header.
        for row in table.select(&row_sel).skip(1) {
            let mut object = serde_json::Map::new();
            for (i, cell) in row.select(&cell_sel).enumerate() {
                let text = cell.text().collect::<Vec<_>>().join(" ");
                let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                object.insert(format!("column_{}", i), Value::String(text));
            }
            if !object.is_empty() {
                records.push(RawRecord::new(None, Value::Object(object)));
            }
        }
    }
    Ok(records)
}

#[async_trait]
impl SourceAdapter for WebAdapter {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<Page, FetchError> {
        let page: usize = match cursor {
            Some(c) => c
                .parse()
                .map_err(|_| FetchError::Malformed(format!("bad web cursor: {}", c)))?,
            None => 1,
        };

        let response = self
            .fetcher
            .get(&self.page_url(page), &self.settings.auth_headers())
            .await?;
        let records = parse_tables(&response.body)?;

        let next_cursor = if records.is_empty() || records.len() < self.settings.page_size {
            None
        } else {
            Some((page + 1).to_string())
        };

        Ok(Page {
            records,
            next_cursor,
            revision: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <html><body>
        <table>
            <tr><th>Number</th><th>Title</th></tr>
            <tr><td>42</td><td>Decree   on
                registries</td></tr>
            <tr><td>43</td><td>Amendment</td></tr>
        </table>
        </body></html>
    "#;

    #[test]
    fn test_table_rows_become_records() {
        let records = parse_tables(LISTING).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload["column_0"], "42");
        assert_eq!(records[0].payload["column_1"], "Decree on registries");
        assert!(records[0].identifier.is_none());
    }

    #[test]
    fn test_page_without_tables_yields_nothing() {
        let records = parse_tables("<html><body><p>no data</p></body></html>").unwrap();
        assert!(records.is_empty());
    }
}
