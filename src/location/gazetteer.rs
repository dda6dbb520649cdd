//! Static lookup tables: cities, countries, sub-national units, macro regions.

use crate::model::MacroRegion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CityEntry {
    pub token: &'static str,
    pub region: Option<&'static str>,
    pub country: &'static str,
}

const fn city(token: &'static str, region: Option<&'static str>, country: &'static str) -> CityEntry {
    CityEntry {
        token,
        region,
        country,
    }
}

// Aliases are lowercase. An alias may appear more than once when it names
// cities in different countries; the first entry is the default.
static CITIES: &[(&[&str], CityEntry)] = &[
    (&["new york", "new york city", "nyc", "manhattan", "brooklyn"], city("new_york", Some("NY"), "US")),
    (&["san francisco", "sf", "san francisco bay area", "bay area"], city("san_francisco", Some("CA"), "US")),
    (&["los angeles", "la"], city("los_angeles", Some("CA"), "US")),
    (&["san jose"], city("san_jose", Some("CA"), "US")),
    (&["palo alto"], city("palo_alto", Some("CA"), "US")),
    (&["mountain view"], city("mountain_view", Some("CA"), "US")),
    (&["menlo park"], city("menlo_park", Some("CA"), "US")),
    (&["san diego"], city("san_diego", Some("CA"), "US")),
    (&["seattle"], city("seattle", Some("WA"), "US")),
    (&["bellevue"], city("bellevue", Some("WA"), "US")),
    (&["portland"], city("portland", Some("OR"), "US")),
    (&["austin"], city("austin", Some("TX"), "US")),
    (&["dallas"], city("dallas", Some("TX"), "US")),
    (&["houston"], city("houston", Some("TX"), "US")),
    (&["denver"], city("denver", Some("CO"), "US")),
    (&["boulder"], city("boulder", Some("CO"), "US")),
    (&["chicago"], city("chicago", Some("IL"), "US")),
    (&["boston", "cambridge"], city("boston", Some("MA"), "US")),
    (&["washington", "washington dc", "washington d.c.", "washington d.c", "dc"], city("washington", Some("DC"), "US")),
    (&["atlanta"], city("atlanta", Some("GA"), "US")),
    (&["miami"], city("miami", Some("FL"), "US")),
    (&["philadelphia"], city("philadelphia", Some("PA"), "US")),
    (&["pittsburgh"], city("pittsburgh", Some("PA"), "US")),
    (&["salt lake city"], city("salt_lake_city", Some("UT"), "US")),
    (&["phoenix"], city("phoenix", Some("AZ"), "US")),
    (&["minneapolis"], city("minneapolis", Some("MN"), "US")),
    (&["detroit"], city("detroit", Some("MI"), "US")),
    (&["raleigh", "durham"], city("raleigh", Some("NC"), "US")),
    (&["nashville"], city("nashville", Some("TN"), "US")),
    (&["toronto"], city("toronto", Some("ON"), "CA")),
    (&["vancouver"], city("vancouver", Some("BC"), "CA")),
    (&["montreal", "montréal"], city("montreal", Some("QC"), "CA")),
    (&["ottawa"], city("ottawa", Some("ON"), "CA")),
    (&["waterloo"], city("waterloo", Some("ON"), "CA")),
    (&["calgary"], city("calgary", Some("AB"), "CA")),
    (&["mexico city", "cdmx", "ciudad de mexico"], city("mexico_city", None, "MX")),
    (&["sao paulo", "são paulo"], city("sao_paulo", None, "BR")),
    (&["buenos aires"], city("buenos_aires", None, "AR")),
    (&["bogota", "bogotá"], city("bogota", None, "CO")),
    (&["santiago"], city("santiago", None, "CL")),
    (&["london"], city("london", None, "GB")),
    (&["london"], city("london", Some("ON"), "CA")),
    (&["manchester"], city("manchester", None, "GB")),
    (&["edinburgh"], city("edinburgh", None, "GB")),
    (&["dublin"], city("dublin", None, "IE")),
    (&["berlin"], city("berlin", None, "DE")),
    (&["munich", "münchen"], city("munich", None, "DE")),
    (&["hamburg"], city("hamburg", None, "DE")),
    (&["paris"], city("paris", None, "FR")),
    (&["amsterdam"], city("amsterdam", None, "NL")),
    (&["madrid"], city("madrid", None, "ES")),
    (&["barcelona"], city("barcelona", None, "ES")),
    (&["lisbon", "lisboa"], city("lisbon", None, "PT")),
    (&["milan", "milano"], city("milan", None, "IT")),
    (&["stockholm"], city("stockholm", None, "SE")),
    (&["copenhagen"], city("copenhagen", None, "DK")),
    (&["oslo"], city("oslo", None, "NO")),
    (&["helsinki"], city("helsinki", None, "FI")),
    (&["warsaw"], city("warsaw", None, "PL")),
    (&["zurich", "zürich"], city("zurich", None, "CH")),
    (&["vienna", "wien"], city("vienna", None, "AT")),
    (&["prague"], city("prague", None, "CZ")),
    (&["tel aviv"], city("tel_aviv", None, "IL")),
    (&["dubai"], city("dubai", None, "AE")),
    (&["cape town"], city("cape_town", None, "ZA")),
    (&["lagos"], city("lagos", None, "NG")),
    (&["nairobi"], city("nairobi", None, "KE")),
    (&["bangalore", "bengaluru"], city("bangalore", None, "IN")),
    (&["hyderabad"], city("hyderabad", None, "IN")),
    (&["mumbai"], city("mumbai", None, "IN")),
    (&["singapore"], city("singapore", None, "SG")),
    (&["tokyo"], city("tokyo", None, "JP")),
    (&["sydney"], city("sydney", Some("NSW"), "AU")),
    (&["melbourne"], city("melbourne", Some("VIC"), "AU")),
    (&["auckland"], city("auckland", None, "NZ")),
    (&["hong kong"], city("hong_kong", None, "HK")),
    (&["seoul"], city("seoul", None, "KR")),
    (&["shanghai"], city("shanghai", None, "CN")),
    (&["taipei"], city("taipei", None, "TW")),
];

static COUNTRIES: &[(&[&str], &str)] = &[
    (&["united states", "united states of america", "usa", "us", "u.s.", "u.s", "u.s.a.", "u.s.a", "america"], "US"),
    (&["canada"], "CA"),
    (&["mexico"], "MX"),
    (&["brazil", "brasil"], "BR"),
    (&["argentina"], "AR"),
    (&["chile"], "CL"),
    (&["colombia"], "CO"),
    (&["peru"], "PE"),
    (&["uruguay"], "UY"),
    (&["costa rica"], "CR"),
    (&["united kingdom", "uk", "u.k.", "u.k", "great britain", "britain", "england", "scotland", "wales", "gb"], "GB"),
    (&["ireland"], "IE"),
    (&["germany", "deutschland"], "DE"),
    (&["france"], "FR"),
    (&["netherlands", "the netherlands", "holland"], "NL"),
    (&["spain"], "ES"),
    (&["portugal"], "PT"),
    (&["italy"], "IT"),
    (&["sweden"], "SE"),
    (&["denmark"], "DK"),
    (&["norway"], "NO"),
    (&["finland"], "FI"),
    (&["poland"], "PL"),
    (&["switzerland"], "CH"),
    (&["austria"], "AT"),
    (&["belgium"], "BE"),
    (&["czech republic", "czechia"], "CZ"),
    (&["romania"], "RO"),
    (&["ukraine"], "UA"),
    (&["estonia"], "EE"),
    (&["lithuania"], "LT"),
    (&["greece"], "GR"),
    (&["hungary"], "HU"),
    (&["turkey", "türkiye"], "TR"),
    (&["israel"], "IL"),
    (&["united arab emirates", "uae"], "AE"),
    (&["south africa"], "ZA"),
    (&["nigeria"], "NG"),
    (&["kenya"], "KE"),
    (&["egypt"], "EG"),
    (&["india"], "IN"),
    (&["singapore"], "SG"),
    (&["japan"], "JP"),
    (&["australia"], "AU"),
    (&["new zealand"], "NZ"),
    (&["china"], "CN"),
    (&["hong kong"], "HK"),
    (&["south korea", "korea"], "KR"),
    (&["taiwan"], "TW"),
    (&["philippines"], "PH"),
    (&["indonesia"], "ID"),
    (&["malaysia"], "MY"),
    (&["vietnam"], "VN"),
    (&["thailand"], "TH"),
];

static US_STATES: &[(&str, &str)] = &[
    ("alabama", "AL"), ("alaska", "AK"), ("arizona", "AZ"), ("arkansas", "AR"),
    ("california", "CA"), ("colorado", "CO"), ("connecticut", "CT"), ("delaware", "DE"),
    ("district of columbia", "DC"), ("florida", "FL"), ("georgia", "GA"), ("hawaii", "HI"),
    ("idaho", "ID"), ("illinois", "IL"), ("indiana", "IN"), ("iowa", "IA"), ("kansas", "KS"),
    ("kentucky", "KY"), ("louisiana", "LA"), ("maine", "ME"), ("maryland", "MD"),
    ("massachusetts", "MA"), ("michigan", "MI"), ("minnesota", "MN"), ("mississippi", "MS"),
    ("missouri", "MO"), ("montana", "MT"), ("nebraska", "NE"), ("nevada", "NV"),
    ("new hampshire", "NH"), ("new jersey", "NJ"), ("new mexico", "NM"), ("new york state", "NY"),
    ("north carolina", "NC"), ("north dakota", "ND"), ("ohio", "OH"), ("oklahoma", "OK"),
    ("oregon", "OR"), ("pennsylvania", "PA"), ("rhode island", "RI"), ("south carolina", "SC"),
    ("south dakota", "SD"), ("tennessee", "TN"), ("texas", "TX"), ("utah", "UT"),
    ("vermont", "VT"), ("virginia", "VA"), ("washington state", "WA"), ("west virginia", "WV"),
    ("wisconsin", "WI"), ("wyoming", "WY"),
];

static CA_PROVINCES: &[(&str, &str)] = &[
    ("alberta", "AB"), ("british columbia", "BC"), ("manitoba", "MB"), ("new brunswick", "NB"),
    ("newfoundland and labrador", "NL"), ("newfoundland", "NL"), ("nova scotia", "NS"),
    ("ontario", "ON"), ("prince edward island", "PE"), ("quebec", "QC"), ("québec", "QC"),
    ("saskatchewan", "SK"), ("northwest territories", "NT"), ("nunavut", "NU"), ("yukon", "YT"),
];

/// Lowercase, trim and collapse inner whitespace.
pub fn clean(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| matches!(c, '-' | '(' | ')' | ',' | ':'))
        .trim()
        .to_lowercase()
}

/// `"Boise City"` → `"boise_city"`.
pub fn slug(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Find a city by alias. `country_hint` picks between same-named cities.
pub fn lookup_city(name: &str, country_hint: Option<&str>) -> Option<CityEntry> {
    let name = clean(name);
    let mut matches = CITIES
        .iter()
        .filter(|(aliases, _)| aliases.contains(&name.as_str()))
        .map(|(_, entry)| *entry);
    let first = matches.next()?;
    match country_hint {
        Some(hint) if first.country != hint => Some(matches.find(|e| e.country == hint).unwrap_or(first)),
        _ => Some(first),
    }
}

pub fn lookup_country(name: &str) -> Option<&'static str> {
    let name = clean(name);
    COUNTRIES
        .iter()
        .find(|(aliases, _)| aliases.contains(&name.as_str()))
        .map(|(_, code)| *code)
}

/// Sub-national unit by full name or postal abbreviation → (code, country).
pub fn lookup_subnational(name: &str) -> Option<(&'static str, &'static str)> {
    let name = clean(name);
    let by_name = |table: &'static [(&'static str, &'static str)], country: &'static str| {
        table
            .iter()
            .find(|(full, code)| {
                *full == name
                    || full.trim_end_matches(" state") == name
                    || code.eq_ignore_ascii_case(&name)
            })
            .map(|(_, code)| (*code, country))
    };
    by_name(US_STATES, "US").or_else(|| by_name(CA_PROVINCES, "CA"))
}

/// Full-name-only variant, used for free text where two-letter words are noise.
pub fn lookup_subnational_name(name: &str) -> Option<(&'static str, &'static str)> {
    let name = clean(name);
    US_STATES
        .iter()
        .find(|(full, _)| *full == name || full.trim_end_matches(" state") == name)
        .map(|(_, code)| (*code, "US"))
        .or_else(|| {
            CA_PROVINCES
                .iter()
                .find(|(full, _)| *full == name)
                .map(|(_, code)| (*code, "CA"))
        })
}

pub fn macro_region(country: &str) -> Option<MacroRegion> {
    let region = match country {
        "US" | "CA" => MacroRegion::Na,
        "MX" | "BR" | "AR" | "CL" | "CO" | "PE" | "UY" | "CR" => MacroRegion::Latam,
        "GB" | "IE" | "DE" | "FR" | "NL" | "ES" | "PT" | "IT" | "SE" | "DK" | "NO" | "FI"
        | "PL" | "CH" | "AT" | "BE" | "CZ" | "RO" | "UA" | "EE" | "LT" | "GR" | "HU" | "TR"
        | "IL" | "AE" | "ZA" | "NG" | "KE" | "EG" => MacroRegion::Emea,
        "IN" | "SG" | "JP" | "AU" | "NZ" | "CN" | "HK" | "KR" | "TW" | "PH" | "ID" | "MY"
        | "VN" | "TH" => MacroRegion::Apac,
        _ => return None,
    };
    Some(region)
}
