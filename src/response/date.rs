//! HTTP-date formatting and parsing. Output is always IMF-fixdate; input may
//! also use the obsolete RFC 850 and asctime forms.

use time::{
    Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset,
    format_description::BorrowedFormatItem, macros::format_description, parsing::Parsed,
};

const HTTP_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

const RFC_850_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:long], [day]-[month repr:short]-[year repr:last_two] [hour]:[minute]:[second] GMT"
);

const ASCTIME_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short] [month repr:short] [day padding:space] [hour]:[minute]:[second] [year]"
);

/// Format a timestamp as `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(value: OffsetDateTime) -> Result<String, time::error::Format> {
    value.to_offset(UtcOffset::UTC).format(HTTP_DATE)
}

/// Parse an HTTP-date header value in any of its three legal forms.
pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    PrimitiveDateTime::parse(value, HTTP_DATE)
        .or_else(|_| PrimitiveDateTime::parse(value, ASCTIME_DATE))
        .ok()
        .or_else(|| parse_rfc_850(value))
        .map(PrimitiveDateTime::assume_utc)
}

/// Two-digit years below 70 land in the 2000s.
fn parse_rfc_850(value: &str) -> Option<PrimitiveDateTime> {
    let mut parsed = Parsed::new();
    let rest = parsed.parse_items(value.as_bytes(), RFC_850_DATE).ok()?;
    if !rest.is_empty() {
        return None;
    }
    let last_two = i32::from(parsed.year_last_two()?);
    let century = if last_two < 70 { 2000 } else { 1900 };
    parsed.set_year(century + last_two)?;
    PrimitiveDateTime::try_from(parsed).ok()
}

/// Drop sub-second precision; HTTP dates only carry whole seconds.
pub fn truncate_to_seconds(value: OffsetDateTime) -> OffsetDateTime {
    value - Duration::nanoseconds(i64::from(value.nanosecond()))
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn formats_imf_fixdate() {
        let value = datetime!(1994-11-06 08:49:37 UTC);
        assert_eq!(
            format_http_date(value).expect("formattable"),
            "Sun, 06 Nov 1994 08:49:37 GMT"
        );
    }

    #[test]
    fn formats_in_utc_regardless_of_offset() {
        let value = datetime!(1994-11-06 10:49:37 +02:00);
        assert_eq!(
            format_http_date(value).expect("formattable"),
            "Sun, 06 Nov 1994 08:49:37 GMT"
        );
    }

    #[test]
    fn parses_imf_fixdate() {
        let parsed = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").expect("valid date");
        assert_eq!(parsed, datetime!(1994-11-06 08:49:37 UTC));
    }

    #[test]
    fn parses_obsolete_forms() {
        let expected = datetime!(1994-11-06 08:49:37 UTC);
        assert_eq!(
            parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT"),
            Some(expected)
        );
        assert_eq!(parse_http_date("Sun Nov  6 08:49:37 1994"), Some(expected));
        assert_eq!(
            parse_http_date("Tuesday, 14-May-24 10:00:00 GMT"),
            Some(datetime!(2024-05-14 10:00:00 UTC))
        );
        assert_eq!(
            parse_http_date("Tue May 14 10:00:00 2024"),
            Some(datetime!(2024-05-14 10:00:00 UTC))
        );
    }

    #[test]
    fn rejects_other_formats() {
        assert!(parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT trailing").is_none());
        assert!(parse_http_date("1994-11-06T08:49:37Z").is_none());
        assert!(parse_http_date("not a date").is_none());
        assert!(parse_http_date("").is_none());
    }

    #[test]
    fn truncation_keeps_whole_seconds() {
        let value = datetime!(2024-03-01 12:00:05.750 UTC);
        assert_eq!(truncate_to_seconds(value), datetime!(2024-03-01 12:00:05 UTC));
    }
}
