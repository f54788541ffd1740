//! Stock GraphQL documents for the market line feed.
//!
//! The realtime client treats query text as opaque; these are the documents
//! the `lf-feed` binary uses when the settings do not override them.

/// Placeholder substituted with the reconciliation cursor in gap-fill queries.
pub const SINCE_PLACEHOLDER: &str = "{since}";

const LINE_FIELDS: &str = "
      marketId
      marketLineId
      marketSourceId
      points
      price
      sourcePrice
      sourceFormat
      statusId
      sequenceNumber
      edge
      bestAltPoints
      bestAltPrice
      bestAltEdge
      disabled
      marketLineKey
      modifiedOn
      alternateLines {
        marketId
        marketLineId
        marketSourceId
        points
        price
        sourcePrice
        sourceFormat
        alternateNumber
        statusId
        sequenceNumber
        edge
        disabled
        modifiedOn
      }";

/// Live subscription; takes an optional `$leagueIds` variable.
pub fn market_line_subscription() -> String {
    format!(
        "subscription marketLineUpdate($leagueIds: [Int]) {{
  marketLineUpdate(leagueIds: $leagueIds) {{
    leagueId
    marketSourceGroup
    messageId
    messageTimestamp
    correlationId
    marketLines {{{LINE_FIELDS}
    }}
  }}
}}"
    )
}

/// Gap-fill query template containing [`SINCE_PLACEHOLDER`].
pub fn market_line_updates_since() -> String {
    format!(
        "query MarketLineUpdates {{
  marketLineUpdates(since: {SINCE_PLACEHOLDER}) {{
    leagueId
    marketSourceGroup
    messageId
    messageTimestamp
    correlationId
    marketLines {{{LINE_FIELDS}
    }}
  }}
}}"
    )
}
