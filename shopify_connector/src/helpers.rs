//! Field-level conversions shared by the outbound builder and the normalizer: phone numbers,
//! US state codes, ISO country codes, timestamps and tax rates.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

const ISO2_TO_ISO3: [(&str, &str); 250] = [
    ("BD", "BGD"), ("BE", "BEL"), ("BF", "BFA"), ("BG", "BGR"), ("BA", "BIH"), ("BB", "BRB"),
    ("WF", "WLF"), ("BL", "BLM"), ("BM", "BMU"), ("BN", "BRN"), ("BO", "BOL"), ("BH", "BHR"),
    ("BI", "BDI"), ("BJ", "BEN"), ("BT", "BTN"), ("JM", "JAM"), ("BV", "BVT"), ("BW", "BWA"),
    ("WS", "WSM"), ("BQ", "BES"), ("BR", "BRA"), ("BS", "BHS"), ("JE", "JEY"), ("BY", "BLR"),
    ("BZ", "BLZ"), ("RU", "RUS"), ("RW", "RWA"), ("RS", "SRB"), ("TL", "TLS"), ("RE", "REU"),
    ("TM", "TKM"), ("TJ", "TJK"), ("RO", "ROU"), ("TK", "TKL"), ("GW", "GNB"), ("GU", "GUM"),
    ("GT", "GTM"), ("GS", "SGS"), ("GR", "GRC"), ("GQ", "GNQ"), ("GP", "GLP"), ("JP", "JPN"),
    ("GY", "GUY"), ("GG", "GGY"), ("GF", "GUF"), ("GE", "GEO"), ("GD", "GRD"), ("GB", "GBR"),
    ("GA", "GAB"), ("SV", "SLV"), ("GN", "GIN"), ("GM", "GMB"), ("GL", "GRL"), ("GI", "GIB"),
    ("GH", "GHA"), ("OM", "OMN"), ("TN", "TUN"), ("JO", "JOR"), ("HR", "HRV"), ("HT", "HTI"),
    ("HU", "HUN"), ("HK", "HKG"), ("HN", "HND"), ("HM", "HMD"), ("VE", "VEN"), ("PR", "PRI"),
    ("PS", "PSE"), ("PW", "PLW"), ("PT", "PRT"), ("SJ", "SJM"), ("PY", "PRY"), ("IQ", "IRQ"),
    ("PA", "PAN"), ("PF", "PYF"), ("PG", "PNG"), ("PE", "PER"), ("PK", "PAK"), ("PH", "PHL"),
    ("PN", "PCN"), ("PL", "POL"), ("PM", "SPM"), ("ZM", "ZMB"), ("EH", "ESH"), ("EE", "EST"),
    ("EG", "EGY"), ("ZA", "ZAF"), ("EC", "ECU"), ("IT", "ITA"), ("VN", "VNM"), ("SB", "SLB"),
    ("ET", "ETH"), ("SO", "SOM"), ("ZW", "ZWE"), ("SA", "SAU"), ("ES", "ESP"), ("ER", "ERI"),
    ("ME", "MNE"), ("MD", "MDA"), ("MG", "MDG"), ("MF", "MAF"), ("MA", "MAR"), ("MC", "MCO"),
    ("UZ", "UZB"), ("MM", "MMR"), ("ML", "MLI"), ("MO", "MAC"), ("MN", "MNG"), ("MH", "MHL"),
    ("MK", "MKD"), ("MU", "MUS"), ("MT", "MLT"), ("MW", "MWI"), ("MV", "MDV"), ("MQ", "MTQ"),
    ("MP", "MNP"), ("MS", "MSR"), ("MR", "MRT"), ("IM", "IMN"), ("UG", "UGA"), ("TZ", "TZA"),
    ("MY", "MYS"), ("MX", "MEX"), ("IL", "ISR"), ("FR", "FRA"), ("IO", "IOT"), ("SH", "SHN"),
    ("FI", "FIN"), ("FJ", "FJI"), ("FK", "FLK"), ("FM", "FSM"), ("FO", "FRO"), ("NI", "NIC"),
    ("NL", "NLD"), ("NO", "NOR"), ("NA", "NAM"), ("VU", "VUT"), ("NC", "NCL"), ("NE", "NER"),
    ("NF", "NFK"), ("NG", "NGA"), ("NZ", "NZL"), ("NP", "NPL"), ("NR", "NRU"), ("NU", "NIU"),
    ("CK", "COK"), ("XK", "XKX"), ("CI", "CIV"), ("CH", "CHE"), ("CO", "COL"), ("CN", "CHN"),
    ("CM", "CMR"), ("CL", "CHL"), ("CC", "CCK"), ("CA", "CAN"), ("CG", "COG"), ("CF", "CAF"),
    ("CD", "COD"), ("CZ", "CZE"), ("CY", "CYP"), ("CX", "CXR"), ("CR", "CRI"), ("CW", "CUW"),
    ("CV", "CPV"), ("CU", "CUB"), ("SZ", "SWZ"), ("SY", "SYR"), ("SX", "SXM"), ("KG", "KGZ"),
    ("KE", "KEN"), ("SS", "SSD"), ("SR", "SUR"), ("KI", "KIR"), ("KH", "KHM"), ("KN", "KNA"),
    ("KM", "COM"), ("ST", "STP"), ("SK", "SVK"), ("KR", "KOR"), ("SI", "SVN"), ("KP", "PRK"),
    ("KW", "KWT"), ("SN", "SEN"), ("SM", "SMR"), ("SL", "SLE"), ("SC", "SYC"), ("KZ", "KAZ"),
    ("KY", "CYM"), ("SG", "SGP"), ("SE", "SWE"), ("SD", "SDN"), ("DO", "DOM"), ("DM", "DMA"),
    ("DJ", "DJI"), ("DK", "DNK"), ("VG", "VGB"), ("DE", "DEU"), ("YE", "YEM"), ("DZ", "DZA"),
    ("US", "USA"), ("UY", "URY"), ("YT", "MYT"), ("UM", "UMI"), ("LB", "LBN"), ("LC", "LCA"),
    ("LA", "LAO"), ("TV", "TUV"), ("TW", "TWN"), ("TT", "TTO"), ("TR", "TUR"), ("LK", "LKA"),
    ("LI", "LIE"), ("LV", "LVA"), ("TO", "TON"), ("LT", "LTU"), ("LU", "LUX"), ("LR", "LBR"),
    ("LS", "LSO"), ("TH", "THA"), ("TF", "ATF"), ("TG", "TGO"), ("TD", "TCD"), ("TC", "TCA"),
    ("LY", "LBY"), ("VA", "VAT"), ("VC", "VCT"), ("AE", "ARE"), ("AD", "AND"), ("AG", "ATG"),
    ("AF", "AFG"), ("AI", "AIA"), ("VI", "VIR"), ("IS", "ISL"), ("IR", "IRN"), ("AM", "ARM"),
    ("AL", "ALB"), ("AO", "AGO"), ("AQ", "ATA"), ("AS", "ASM"), ("AR", "ARG"), ("AU", "AUS"),
    ("AT", "AUT"), ("AW", "ABW"), ("IN", "IND"), ("AX", "ALA"), ("AZ", "AZE"), ("IE", "IRL"),
    ("ID", "IDN"), ("UA", "UKR"), ("QA", "QAT"), ("MZ", "MOZ"),
];

static ISO2_MAP: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| ISO2_TO_ISO3.iter().copied().collect());

static ISO3_MAP: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| ISO2_TO_ISO3.iter().map(|(two, three)| (*three, *two)).collect());

static US_STATES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("alabama", "AL"), ("alaska", "AK"), ("arizona", "AZ"), ("arkansas", "AR"),
        ("california", "CA"), ("colorado", "CO"), ("connecticut", "CT"), ("delaware", "DE"),
        ("districtofcolumbia", "DC"), ("florida", "FL"), ("georgia", "GA"), ("hawaii", "HI"),
        ("idaho", "ID"), ("illinois", "IL"), ("indiana", "IN"), ("iowa", "IA"), ("kansas", "KS"),
        ("kentucky", "KY"), ("louisiana", "LA"), ("maine", "ME"), ("maryland", "MD"),
        ("massachusetts", "MA"), ("michigan", "MI"), ("minnesota", "MN"), ("mississippi", "MS"),
        ("missouri", "MO"), ("montana", "MT"), ("nebraska", "NE"), ("nevada", "NV"),
        ("newhampshire", "NH"), ("newjersey", "NJ"), ("newmexico", "NM"), ("newyork", "NY"),
        ("northcarolina", "NC"), ("northdakota", "ND"), ("ohio", "OH"), ("oklahoma", "OK"),
        ("oregon", "OR"), ("pennsylvania", "PA"), ("rhodeisland", "RI"), ("southcarolina", "SC"),
        ("southdakota", "SD"), ("tennessee", "TN"), ("texas", "TX"), ("utah", "UT"),
        ("vermont", "VT"), ("virginia", "VA"), ("washington", "WA"), ("westvirginia", "WV"),
        ("wisconsin", "WI"), ("wyoming", "WY"), ("puertorico", "PR"),
    ]
    .into_iter()
    .collect()
});

static PHONE_EXTENSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\s|)ex.*").unwrap());
static NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\d]").unwrap());
static NANP_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(([0-9])(\d{3})|(^\d{3}))?(\d{3})(\d{4})\d*").unwrap());

/// Reduces a free-form phone string to NANP `AAA-EEE-NNNN` form, dropping extensions and the
/// leading country digit. Numbers that do not look like NANP pass through as bare digits, and
/// the all-zero placeholder becomes empty.
pub fn format_phone_number(number: &str) -> String {
    let number = PHONE_EXTENSION.replace(number, "");
    let number = NON_DIGITS.replace_all(&number, "");
    let mut number = number.into_owned();
    if let Some(caps) = NANP_NUMBER.captures(&number) {
        let group = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or("");
        number = if group(4).is_empty() {
            format!("{}{}-{}-{}", group(2), group(3), group(5), group(6))
        } else {
            format!("{}-{}-{}", group(4), group(5), group(6))
        };
    }
    if number == "000-000-0000" {
        number.clear();
    }
    number
}

/// Maps a spelled-out US state to its two-letter code. Unknown values pass through with
/// non-alphabetic characters removed and uppercased.
pub fn convert_usa_state_to_2_chars(state: &str) -> String {
    let filtered: String = state.chars().filter(|c| c.is_ascii_alphabetic()).collect();
    let key = filtered.to_lowercase();
    match US_STATES.get(key.as_str()) {
        Some(code) => (*code).to_string(),
        None => key.to_uppercase(),
    }
}

/// ISO3 to ISO2. Codes already in ISO2 form, or unknown codes, pass through uppercased.
pub fn convert_country_code_to_iso2(country_code: &str) -> String {
    let code = country_code.to_uppercase();
    match ISO3_MAP.get(code.as_str()) {
        Some(two) => (*two).to_string(),
        None => code,
    }
}

/// ISO2 to ISO3. Codes already in ISO3 form, or unknown codes, pass through uppercased.
pub fn convert_country_code_to_iso3(country_code: &str) -> String {
    let code = country_code.to_uppercase();
    match ISO2_MAP.get(code.as_str()) {
        Some(three) => (*three).to_string(),
        None => code,
    }
}

/// Parses the handful of timestamp shapes marketplaces send and re-emits UTC ISO 8601 with an
/// explicit `+00:00` offset. Unparseable input becomes an empty string.
pub fn convert_date_to_utc_iso_8601(date: &str) -> String {
    if date.is_empty() {
        return String::new();
    }
    let parsed: Option<DateTime<Utc>> = DateTime::parse_from_rfc3339(date)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(date, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(date, "%Y-%m-%dT%H:%M:%S"))
                .or_else(|_| NaiveDateTime::parse_from_str(date, "%m/%d/%Y %H:%M:%S"))
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(date, "%Y-%m-%d")
                        .or_else(|_| NaiveDate::parse_from_str(date, "%m/%d/%Y"))
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
                .map(|naive| Utc.from_utc_datetime(&naive))
        });
    match parsed {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, false),
        None => String::new(),
    }
}

/// Tax rates carry four decimal places on the wire.
pub fn round_rate(rate: f64) -> f64 {
    (rate * 10_000.0).round() / 10_000.0
}
