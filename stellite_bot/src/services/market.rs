use html_escape::encode_text;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Ticker {
    success: bool,
    #[serde(default)]
    price: Option<String>,
}

/// Get XTL's last trade price in `pairing_asset` from an exchange ticker.
///
/// Returns [`None`] if the exchange says the request didn't succeed.
pub async fn fetch_xtl_price(
    client: &reqwest::Client,
    ticker_url: &str,
    pairing_asset: &str,
) -> Result<Option<String>, reqwest::Error> {
    let url = format!("{}/{}-XTL", ticker_url.trim_end_matches('/'), pairing_asset);
    let ticker: Ticker = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(ticker.success.then_some(ticker.price).flatten())
}

/// One coin as listed by the market cap ticker. Everything is a string there.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    pub rank: Option<String>,
    pub price_usd: Option<String>,
    pub price_btc: Option<String>,
    #[serde(rename = "24h_volume_usd")]
    pub volume_usd_24h: Option<String>,
    pub market_cap_usd: Option<String>,
    pub percent_change_24h: Option<String>,
}

pub async fn fetch_market_info(
    client: &reqwest::Client,
    cmc_url: &str,
) -> Result<Option<MarketInfo>, reqwest::Error> {
    let listing: Vec<MarketInfo> = client
        .get(cmc_url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(listing.into_iter().next())
}

/// Group the integer part of a decimal number by thousands.
fn group_thousands(number: &str) -> String {
    let (integer, fraction) = match number.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (number, None),
    };

    let mut grouped = String::with_capacity(number.len() + number.len() / 3);
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    if let Some(fraction) = fraction {
        grouped.push('.');
        grouped.push_str(fraction);
    }
    grouped
}

pub fn format_market_info(info: &MarketInfo) -> String {
    let field = |value: &Option<String>| value.as_deref().unwrap_or("?").to_string();
    let money = |value: &Option<String>| {
        value
            .as_deref()
            .map(|v| group_thousands(v.split('.').next().unwrap_or(v)))
            .unwrap_or_else(|| String::from("?"))
    };

    let text = format!(
        concat!(
            "{} ({})\n",
            "Rank:       {}\n",
            "Price USD:  {}\n",
            "Price BTC:  {}\n",
            "Change 24h: {}%\n",
            "Market cap: {} USD\n",
            "Volume 24h: {} USD",
        ),
        info.name,
        info.symbol,
        field(&info.rank),
        field(&info.price_usd),
        field(&info.price_btc),
        field(&info.percent_change_24h),
        money(&info.market_cap_usd),
        money(&info.volume_usd_24h),
    );

    format!("<pre>{}</pre>", encode_text(&text))
}
