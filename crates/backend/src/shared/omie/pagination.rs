use serde_json::{json, Value};

use super::client::{OmieApiClient, OmieError};

/// The Omie API splits list calls into two pagination conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStyle {
    /// `pagina` / `registros_por_pagina` / `total_de_paginas`
    Default,
    /// `nPagina` / `nRegPorPagina` / `nTotPaginas` (financial movements)
    Mf,
}

impl PaginationStyle {
    fn page_field(self) -> &'static str {
        match self {
            PaginationStyle::Default => "pagina",
            PaginationStyle::Mf => "nPagina",
        }
    }

    fn size_field(self) -> &'static str {
        match self {
            PaginationStyle::Default => "registros_por_pagina",
            PaginationStyle::Mf => "nRegPorPagina",
        }
    }

    fn total_field(self) -> &'static str {
        match self {
            PaginationStyle::Default => "total_de_paginas",
            PaginationStyle::Mf => "nTotPaginas",
        }
    }
}

pub struct ListConfig<'a> {
    pub endpoint: &'a str,
    pub call: &'a str,
    /// Fixed call parameters; page fields are merged in per request.
    pub params: Value,
    /// Response key holding the record array.
    pub data_key: &'a str,
    pub page_size: u64,
    pub style: PaginationStyle,
}

pub struct PageSet {
    pub records: Vec<Value>,
    /// Total pages reported by the last response.
    pub total_pages: u64,
    /// Last page actually fetched.
    pub last_page: u64,
}

impl PageSet {
    pub fn done(&self) -> bool {
        self.last_page >= self.total_pages
    }
}

/// Fetch pages `from_page..` sequentially until the reported total or the
/// optional `to_page` bound, whichever comes first. Pages are fetched in
/// order; the client underneath handles rate limiting and retries.
pub async fn list_pages(
    client: &OmieApiClient,
    config: &ListConfig<'_>,
    from_page: u64,
    to_page: Option<u64>,
) -> Result<PageSet, OmieError> {
    let mut records = Vec::new();
    let mut page = from_page.max(1);
    let mut total_pages;

    loop {
        let mut params = config.params.clone();
        if let Some(obj) = params.as_object_mut() {
            obj.insert(config.style.page_field().to_string(), json!(page));
            obj.insert(config.style.size_field().to_string(), json!(config.page_size));
        }

        let response = client.call(config.endpoint, config.call, params).await?;

        if let Some(rows) = response.get(config.data_key).and_then(Value::as_array) {
            records.extend(rows.iter().cloned());
        }
        total_pages = response
            .get(config.style.total_field())
            .and_then(Value::as_u64)
            .unwrap_or(1);

        page += 1;
        let within_total = page <= total_pages;
        let within_bound = to_page.map_or(true, |bound| page <= bound);
        if !(within_total && within_bound) {
            break;
        }
    }

    Ok(PageSet {
        records,
        total_pages,
        last_page: page - 1,
    })
}

/// Fetch every page of a list call.
pub async fn list_all(
    client: &OmieApiClient,
    config: &ListConfig<'_>,
) -> Result<Vec<Value>, OmieError> {
    Ok(list_pages(client, config, 1, None).await?.records)
}
