//! Daylog domain library: read habit/journal notes (a `---` metadata block plus
//! `### Header` sections) into typed records and write edits back while leaving
//! every untouched byte of the note as it was.
//!
//! The core is pure text in, text out. Loading and persisting notes goes through
//! the `storage::DocumentStore` collaborator.

pub mod core {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
    use indexmap::IndexMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::{fmt, str::FromStr};

    /// Highest accepted day rating.
    pub const MAX_RATING: u8 = 10;

    /* ------------------------------ Time of day ------------------------------ */

    /// Wall-clock time with minute precision, always rendered as `HH:MM`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct TimeOfDay {
        hour: u8,
        minute: u8,
    }

    impl TimeOfDay {
        /// Returns `None` unless `hour <= 23` and `minute <= 59`.
        pub fn new(hour: u32, minute: u32) -> Option<Self> {
            if hour <= 23 && minute <= 59 {
                Some(Self {
                    hour: hour as u8,
                    minute: minute as u8,
                })
            } else {
                None
            }
        }

        pub fn hour(&self) -> u32 {
            u32::from(self.hour)
        }

        pub fn minute(&self) -> u32 {
            u32::from(self.minute)
        }

        pub fn minutes_since_midnight(&self) -> u32 {
            self.hour() * 60 + self.minute()
        }
    }

    impl fmt::Display for TimeOfDay {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:02}:{:02}", self.hour, self.minute)
        }
    }

    impl FromStr for TimeOfDay {
        type Err = DomainError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            crate::dates::parse_clock(s).ok_or_else(|| DomainError::InvalidTime(s.to_string()))
        }
    }

    impl From<TimeOfDay> for NaiveTime {
        fn from(t: TimeOfDay) -> Self {
            NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or_default()
        }
    }

    impl Serialize for TimeOfDay {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_str(self)
        }
    }

    impl<'de> Deserialize<'de> for TimeOfDay {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let raw = String::deserialize(deserializer)?;
            raw.parse().map_err(serde::de::Error::custom)
        }
    }

    /// Anything that can render itself as a wall-clock `HH:MM` string.
    ///
    /// Hosts hand over rich date/time objects for time-typed properties; the
    /// normalizer only relies on this capability.
    pub trait FormatTime {
        fn format_hm(&self) -> String;
    }

    impl FormatTime for TimeOfDay {
        fn format_hm(&self) -> String {
            self.to_string()
        }
    }

    impl FormatTime for NaiveTime {
        fn format_hm(&self) -> String {
            self.format("%H:%M").to_string()
        }
    }

    impl FormatTime for NaiveDateTime {
        fn format_hm(&self) -> String {
            self.format("%H:%M").to_string()
        }
    }

    impl<Tz: TimeZone> FormatTime for DateTime<Tz>
    where
        Tz::Offset: fmt::Display,
    {
        fn format_hm(&self) -> String {
            self.format("%H:%M").to_string()
        }
    }

    /* ---------------------------- Metadata values ---------------------------- */

    /// One scalar from a note's metadata block.
    ///
    /// The host hands back loosely typed values; every consumer picks an explicit
    /// coercion (`is_truthy`, `as_rating`, `dates::normalize_time`) instead of
    /// guessing.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type", content = "value", rename_all = "snake_case")]
    pub enum MetaValue {
        Null,
        Bool(bool),
        Integer(i64),
        Float(f64),
        Text(String),
        Time(NaiveTime),
        DateTime(NaiveDateTime),
        /// Sequences and mappings, kept as flow-style text.
        Other(String),
    }

    impl MetaValue {
        pub fn is_null(&self) -> bool {
            matches!(self, MetaValue::Null)
        }

        /// Truthiness as the host scripting layer defines it: null, `false`,
        /// zero, NaN and the empty string are false; everything else is true,
        /// including the text `"false"`.
        pub fn is_truthy(&self) -> bool {
            match self {
                MetaValue::Null => false,
                MetaValue::Bool(b) => *b,
                MetaValue::Integer(n) => *n != 0,
                MetaValue::Float(f) => *f != 0.0 && !f.is_nan(),
                MetaValue::Text(s) => !s.is_empty(),
                MetaValue::Time(_) | MetaValue::DateTime(_) | MetaValue::Other(_) => true,
            }
        }

        /// A rating is only taken from numeric values that are whole and within
        /// `0..=MAX_RATING`.
        pub fn as_rating(&self) -> Option<u8> {
            match self {
                MetaValue::Integer(n) => u8::try_from(*n).ok().filter(|r| *r <= MAX_RATING),
                MetaValue::Float(f)
                    if f.fract() == 0.0 && (0.0..=f64::from(MAX_RATING)).contains(f) =>
                {
                    Some(*f as u8)
                }
                _ => None,
            }
        }
    }

    impl fmt::Display for MetaValue {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                MetaValue::Null => Ok(()),
                MetaValue::Bool(b) => write!(f, "{b}"),
                MetaValue::Integer(n) => write!(f, "{n}"),
                MetaValue::Float(x) => write!(f, "{x}"),
                MetaValue::Text(s) | MetaValue::Other(s) => f.write_str(s),
                MetaValue::Time(t) => write!(f, "{}", t.format("%H:%M")),
                MetaValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            }
        }
    }

    impl From<bool> for MetaValue {
        fn from(b: bool) -> Self {
            MetaValue::Bool(b)
        }
    }

    impl From<i64> for MetaValue {
        fn from(n: i64) -> Self {
            MetaValue::Integer(n)
        }
    }

    impl From<&str> for MetaValue {
        fn from(s: &str) -> Self {
            MetaValue::Text(s.to_string())
        }
    }

    impl From<String> for MetaValue {
        fn from(s: String) -> Self {
            MetaValue::Text(s)
        }
    }

    /// Times are stored as plain `HH:MM` text in the metadata block.
    impl From<TimeOfDay> for MetaValue {
        fn from(t: TimeOfDay) -> Self {
            MetaValue::Text(t.to_string())
        }
    }

    /// Ordered key → scalar mapping read from a metadata block.
    pub type MetadataMap = IndexMap<String, MetaValue>;

    /* -------------------------------- Sections -------------------------------- */

    /// A named body section as found in the document.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Section {
        /// Header text as written in the document.
        pub header: String,
        /// Body text, trimmed.
        pub content: String,
    }

    /// Case-insensitive header → section body mapping.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SectionMap {
        entries: IndexMap<String, Section>,
    }

    impl SectionMap {
        /// Records a section; a header seen earlier in the document keeps its body.
        pub fn insert(&mut self, header: &str, content: &str) -> bool {
            let key = header_key(header);
            if self.entries.contains_key(&key) {
                return false;
            }
            self.entries.insert(
                key,
                Section {
                    header: header.trim().to_string(),
                    content: content.to_string(),
                },
            );
            true
        }

        pub fn get(&self, header: &str) -> Option<&str> {
            self.entries
                .get(&header_key(header))
                .map(|s| s.content.as_str())
        }

        pub fn contains(&self, header: &str) -> bool {
            self.entries.contains_key(&header_key(header))
        }

        /// Body of the first header in `headers` that is present, even if empty.
        pub fn first_present<I, S>(&self, headers: I) -> Option<&str>
        where
            I: IntoIterator<Item = S>,
            S: AsRef<str>,
        {
            headers.into_iter().find_map(|h| self.get(h.as_ref()))
        }

        pub fn len(&self) -> usize {
            self.entries.len()
        }

        pub fn is_empty(&self) -> bool {
            self.entries.is_empty()
        }

        pub fn iter(&self) -> impl Iterator<Item = &Section> {
            self.entries.values()
        }
    }

    /// Comparison key for section headers.
    pub fn header_key(header: &str) -> String {
        header.trim().to_lowercase()
    }

    /// Byte range into a document.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SourceRange {
        pub start: usize,
        pub end: usize,
    }

    impl SourceRange {
        pub fn slice<'a>(&self, source: &'a str) -> &'a str {
            &source[self.start..self.end]
        }

        pub fn is_empty(&self) -> bool {
            self.start >= self.end
        }
    }

    /* ------------------------------- Locators ------------------------------- */

    /// Opaque reference to a document in the store (vault-relative path).
    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Locator(pub String);

    impl Locator {
        pub fn new(path: impl Into<String>) -> Self {
            Self(path.into())
        }

        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl fmt::Display for Locator {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl From<&str> for Locator {
        fn from(s: &str) -> Self {
            Self(s.to_string())
        }
    }

    /* --------------------------------- Fields --------------------------------- */

    /// A tracked value of a day or period note.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub enum Field {
        Bedtime,
        WakeTime,
        ScreenTime,
        Exercise,
        Reading,
        Sobriety,
        Rating,
        Tasks,
        Journal,
        Goal,
    }

    /// How a field's raw value is coerced.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FieldKind {
        Time,
        Flag,
        Rating,
        Text,
    }

    impl Field {
        pub const ALL: [Field; 10] = [
            Field::Bedtime,
            Field::WakeTime,
            Field::ScreenTime,
            Field::Exercise,
            Field::Reading,
            Field::Sobriety,
            Field::Rating,
            Field::Tasks,
            Field::Journal,
            Field::Goal,
        ];

        /// Fields carried by a `DayRecord`.
        pub const DAY_FIELDS: [Field; 9] = [
            Field::Bedtime,
            Field::WakeTime,
            Field::ScreenTime,
            Field::Exercise,
            Field::Reading,
            Field::Sobriety,
            Field::Rating,
            Field::Tasks,
            Field::Journal,
        ];

        pub fn kind(self) -> FieldKind {
            match self {
                Field::Bedtime | Field::WakeTime | Field::ScreenTime => FieldKind::Time,
                Field::Exercise | Field::Reading | Field::Sobriety => FieldKind::Flag,
                Field::Rating => FieldKind::Rating,
                Field::Tasks | Field::Journal | Field::Goal => FieldKind::Text,
            }
        }

        pub fn name(self) -> &'static str {
            match self {
                Field::Bedtime => "bedtime",
                Field::WakeTime => "wakeTime",
                Field::ScreenTime => "screenTime",
                Field::Exercise => "exercise",
                Field::Reading => "reading",
                Field::Sobriety => "sobriety",
                Field::Rating => "rating",
                Field::Tasks => "tasks",
                Field::Journal => "journal",
                Field::Goal => "goal",
            }
        }

        /// Section header used when nothing overrides it: the lower-cased field
        /// name with its first letter capitalized (`tasks` → `Tasks`).
        pub fn default_header(self) -> String {
            let lower = self.name().to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }

    impl fmt::Display for Field {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.name())
        }
    }

    impl FromStr for Field {
        type Err = DomainError;

        /// Accepts `wakeTime`, `wake_time`, `wake-time`, `WAKETIME`, ...
        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let wanted: String = s
                .chars()
                .filter(|c| !matches!(c, '_' | '-' | ' '))
                .collect::<String>()
                .to_lowercase();
            Field::ALL
                .into_iter()
                .find(|f| f.name().to_lowercase() == wanted)
                .ok_or_else(|| DomainError::UnknownField(s.to_string()))
        }
    }

    /// Document flavor: which kind of periodic note a document is.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum NoteKind {
        Daily,
        Weekly,
        Monthly,
    }

    impl fmt::Display for NoteKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                NoteKind::Daily => "daily",
                NoteKind::Weekly => "weekly",
                NoteKind::Monthly => "monthly",
            })
        }
    }

    impl FromStr for NoteKind {
        type Err = DomainError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_lowercase().as_str() {
                "daily" | "day" => Ok(NoteKind::Daily),
                "weekly" | "week" => Ok(NoteKind::Weekly),
                "monthly" | "month" => Ok(NoteKind::Monthly),
                _ => Err(DomainError::UnknownNoteKind(s.to_string())),
            }
        }
    }

    /// Dashboard date window.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum ViewMode {
        Recent,
        Weekly,
        Monthly,
        Yearly,
    }

    impl fmt::Display for ViewMode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                ViewMode::Recent => "recent",
                ViewMode::Weekly => "weekly",
                ViewMode::Monthly => "monthly",
                ViewMode::Yearly => "yearly",
            })
        }
    }

    impl FromStr for ViewMode {
        type Err = DomainError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_lowercase().as_str() {
                "recent" => Ok(ViewMode::Recent),
                "weekly" => Ok(ViewMode::Weekly),
                "monthly" => Ok(ViewMode::Monthly),
                "yearly" => Ok(ViewMode::Yearly),
                _ => Err(DomainError::UnknownViewMode(s.to_string())),
            }
        }
    }

    /* -------------------------------- Records -------------------------------- */

    /// One calendar day's tracked data.
    ///
    /// A record is a snapshot of the last parse; after a write it is only an
    /// optimistic local copy until the note is read again.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DayRecord {
        pub date: NaiveDate,
        /// Back-reference to the note this record was read from.
        pub source: Locator,
        pub bedtime: Option<TimeOfDay>,
        pub wake_time: Option<TimeOfDay>,
        pub screen_time: Option<TimeOfDay>,
        pub exercise: bool,
        pub reading: bool,
        pub sobriety: bool,
        /// `0..=MAX_RATING`.
        pub rating: Option<u8>,
        /// Serialized checklist text.
        pub tasks: String,
        pub journal: String,
    }

    impl DayRecord {
        pub fn new(date: NaiveDate, source: Locator) -> Self {
            Self {
                date,
                source,
                bedtime: None,
                wake_time: None,
                screen_time: None,
                exercise: false,
                reading: false,
                sobriety: false,
                rating: None,
                tasks: String::new(),
                journal: String::new(),
            }
        }

        pub fn sleep_minutes(&self) -> Option<u32> {
            crate::dates::sleep_duration(self.bedtime, self.wake_time)
        }

        /// Coerces a raw value into `field`, the way the read path does.
        pub fn assign(&mut self, field: Field, raw: &MetaValue) {
            use crate::dates::normalize_time;
            match field {
                Field::Bedtime => self.bedtime = normalize_time(raw),
                Field::WakeTime => self.wake_time = normalize_time(raw),
                Field::ScreenTime => self.screen_time = normalize_time(raw),
                Field::Exercise => self.exercise = raw.is_truthy(),
                Field::Reading => self.reading = raw.is_truthy(),
                Field::Sobriety => self.sobriety = raw.is_truthy(),
                Field::Rating => self.rating = raw.as_rating(),
                Field::Tasks => self.tasks = raw.to_string(),
                Field::Journal => self.journal = raw.to_string(),
                Field::Goal => {}
            }
        }

        /// Current value of `field` in the form an edit would carry.
        pub fn field_value(&self, field: Field) -> MetaValue {
            let time = |t: Option<TimeOfDay>| t.map(MetaValue::from).unwrap_or(MetaValue::Null);
            match field {
                Field::Bedtime => time(self.bedtime),
                Field::WakeTime => time(self.wake_time),
                Field::ScreenTime => time(self.screen_time),
                Field::Exercise => MetaValue::Bool(self.exercise),
                Field::Reading => MetaValue::Bool(self.reading),
                Field::Sobriety => MetaValue::Bool(self.sobriety),
                Field::Rating => self
                    .rating
                    .map(|r| MetaValue::Integer(i64::from(r)))
                    .unwrap_or(MetaValue::Null),
                Field::Tasks => MetaValue::Text(self.tasks.clone()),
                Field::Journal => MetaValue::Text(self.journal.clone()),
                Field::Goal => MetaValue::Null,
            }
        }
    }

    /// A weekly or monthly note's goal section.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct PeriodGoal {
        /// e.g. `2023 Week 06` or `2024-01`.
        pub period_label: String,
        pub source: Locator,
        pub content: String,
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum DomainError {
        #[error("invalid time of day `{0}` (expected HH:MM)")]
        InvalidTime(String),
        #[error("unknown field `{0}`")]
        UnknownField(String),
        #[error("unknown note kind `{0}`")]
        UnknownNoteKind(String),
        #[error("unknown view mode `{0}`")]
        UnknownViewMode(String),
        #[error("field `{0}` has no metadata key or section binding")]
        UnmappedField(Field),
    }

}

pub mod dates {
    //! Time-of-day normalization, sleep arithmetic and calendar windows.
    //!
    //! Everything here is total: malformed input yields `None`, never a panic.

    use crate::core::{FormatTime, MetaValue, TimeOfDay, ViewMode};
    use chrono::{Datelike, Duration, Months, NaiveDate};
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take, take_till, take_while_m_n},
        character::complete::{char, one_of},
        combinator::{all_consuming, map, map_opt, recognize, value},
        error::VerboseError,
        multi::many0,
        sequence::{delimited, preceded, separated_pair, terminated, tuple},
    };

    /// Default length of the `recent` window.
    pub const DEFAULT_RECENT_DAYS: u32 = 15;
    /// Longest `recent` window settings may ask for.
    pub const MAX_RECENT_DAYS: u32 = 3660;
    const MINUTES_PER_DAY: u32 = 24 * 60;

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /* ------------------------------ Clock parsing ------------------------------ */

    fn is_digit(c: char) -> bool {
        c.is_ascii_digit()
    }

    fn hour_digits(i: &str) -> PResult<'_, &str> {
        take_while_m_n(1, 2, is_digit)(i)
    }

    fn two_digits(i: &str) -> PResult<'_, &str> {
        take_while_m_n(2, 2, is_digit)(i)
    }

    fn four_digits(i: &str) -> PResult<'_, &str> {
        take_while_m_n(4, 4, is_digit)(i)
    }

    fn to_time((hour, minute): (&str, &str)) -> Option<TimeOfDay> {
        TimeOfDay::new(hour.parse().ok()?, minute.parse().ok()?)
    }

    /// `H:MM` or `HH:MM`, range-checked.
    fn clock(i: &str) -> PResult<'_, TimeOfDay> {
        map_opt(separated_pair(hour_digits, char(':'), two_digits), to_time)(i)
    }

    fn iso_date(i: &str) -> PResult<'_, &str> {
        recognize(tuple((
            four_digits,
            char('-'),
            two_digits,
            char('-'),
            two_digits,
        )))(i)
    }

    /// Clock right after the date/time delimiter of an ISO-8601 datetime;
    /// seconds, fractions and offsets that follow are ignored.
    fn iso_datetime_clock(i: &str) -> PResult<'_, TimeOfDay> {
        preceded(
            terminated(iso_date, one_of("Tt ")),
            map_opt(separated_pair(two_digits, char(':'), two_digits), to_time),
        )(i)
    }

    /// Parses a bare `HH:MM` (or `H:MM`) string.
    pub fn parse_clock(raw: &str) -> Option<TimeOfDay> {
        all_consuming(clock)(raw.trim()).ok().map(|(_, t)| t)
    }

    /// Normalizes text that is either a clock or an ISO datetime.
    pub fn normalize_time_str(raw: &str) -> Option<TimeOfDay> {
        let raw = raw.trim();
        if let Ok((_, t)) = iso_datetime_clock(raw) {
            return Some(t);
        }
        parse_clock(raw)
    }

    /// Normalizes any time-like value through its formatting capability.
    pub fn normalize_formattable<T: FormatTime + ?Sized>(value: &T) -> Option<TimeOfDay> {
        parse_clock(&value.format_hm())
    }

    /// Reduces a raw metadata value to a time of day, or `None` when it does not
    /// hold one.
    pub fn normalize_time(raw: &MetaValue) -> Option<TimeOfDay> {
        match raw {
            MetaValue::Text(s) => normalize_time_str(s),
            MetaValue::Time(t) => normalize_formattable(t),
            MetaValue::DateTime(dt) => normalize_formattable(dt),
            _ => None,
        }
    }

    pub fn time_to_minutes(raw: &str) -> Option<u32> {
        parse_clock(raw).map(|t| t.minutes_since_midnight())
    }

    /// Minutes slept between `bedtime` and `wake`.
    ///
    /// A bedtime later on the clock than the wake time happened the previous
    /// evening. Otherwise both fall after midnight, so equal times give 0 rather
    /// than a full day.
    pub fn sleep_duration(bedtime: Option<TimeOfDay>, wake: Option<TimeOfDay>) -> Option<u32> {
        let bed = bedtime?.minutes_since_midnight();
        let wake = wake?.minutes_since_midnight();
        if bed > wake {
            Some((MINUTES_PER_DAY - bed) + wake)
        } else {
            Some(wake - bed)
        }
    }

    /* ------------------------------ Calendar ------------------------------ */

    /// Monday of the ISO week containing `date`.
    pub fn week_start(date: NaiveDate) -> NaiveDate {
        date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
    }

    pub fn month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
        let first = date - Duration::days(i64::from(date.day0()));
        let last = first
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt())
            .unwrap_or(date);
        (first, last)
    }

    pub fn year_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
        let first = date - Duration::days(i64::from(date.ordinal0()));
        let last = NaiveDate::from_ymd_opt(date.year(), 12, 31).unwrap_or(date);
        (first, last)
    }

    /// Inclusive `(start, end)` window for a dashboard view.
    pub fn date_range_for(
        mode: ViewMode,
        reference: NaiveDate,
        recent_days: u32,
    ) -> (NaiveDate, NaiveDate) {
        match mode {
            ViewMode::Recent => {
                let span = Duration::days(i64::from(recent_days.max(1)) - 1);
                let start = reference.checked_sub_signed(span).unwrap_or(NaiveDate::MIN);
                (start, reference)
            }
            ViewMode::Weekly => {
                let start = week_start(reference);
                (start, start + Duration::days(6))
            }
            ViewMode::Monthly => month_bounds(reference),
            ViewMode::Yearly => year_bounds(reference),
        }
    }

    pub fn iso_week_number(date: NaiveDate) -> u32 {
        date.iso_week().week()
    }

    /// Every date from `start` to `end` inclusive, ascending. Empty when
    /// `start > end`.
    pub fn enumerate_dates(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        start.iter_days().take_while(|d| *d <= end).collect()
    }

    pub fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
    }

    /// `"7h 05m"`.
    pub fn format_minutes_hm(minutes: u32) -> String {
        format!("{}h {:02}m", minutes / 60, minutes % 60)
    }

    /// `YY-MM-DD <weekday>` with Sunday-first weekday labels.
    pub fn format_date_label(date: NaiveDate, weekday_labels: &[String]) -> String {
        let idx = date.weekday().num_days_from_sunday() as usize;
        let day = weekday_labels
            .get(idx)
            .cloned()
            .unwrap_or_else(|| date.format("%a").to_string());
        format!("{} {}", date.format("%y-%m-%d"), day)
    }

    /* ------------------------- File name patterns ------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum PatternToken<'a> {
        Literal(&'a str),
        Year,
        IsoYear,
        ShortYear,
        Month2,
        Month,
        Day2,
        Day,
        WeekdayLong,
        WeekdayShort,
        Week2,
        Week,
    }

    fn pattern_token(i: &str) -> PResult<'_, PatternToken<'_>> {
        alt((
            map(
                delimited(char('['), take_till(|c: char| c == ']'), char(']')),
                PatternToken::Literal,
            ),
            value(PatternToken::Year, tag("YYYY")),
            value(PatternToken::IsoYear, tag("GGGG")),
            value(PatternToken::ShortYear, tag("YY")),
            value(PatternToken::Month2, tag("MM")),
            value(PatternToken::Month, tag("M")),
            value(PatternToken::WeekdayLong, tag("dddd")),
            value(PatternToken::WeekdayShort, tag("ddd")),
            value(PatternToken::Day2, tag("DD")),
            value(PatternToken::Day, tag("D")),
            value(PatternToken::Week2, tag("WW")),
            value(PatternToken::Week, tag("W")),
            map(take(1usize), PatternToken::Literal),
        ))(i)
    }

    /// Renders `date` with a moment-style file name pattern.
    ///
    /// Supported tokens: `YYYY YY GGGG MM M DD D dddd ddd WW W`; `[text]` is
    /// literal and any other character is copied through.
    pub fn format_with_pattern(pattern: &str, date: NaiveDate) -> String {
        let tokens = match all_consuming(many0(pattern_token))(pattern) {
            Ok((_, tokens)) => tokens,
            Err(_) => return pattern.to_string(),
        };
        let mut out = String::with_capacity(pattern.len() + 8);
        for token in tokens {
            match token {
                PatternToken::Literal(s) => out.push_str(s),
                PatternToken::Year => out.push_str(&format!("{:04}", date.year())),
                PatternToken::IsoYear => out.push_str(&format!("{:04}", date.iso_week().year())),
                PatternToken::ShortYear => {
                    out.push_str(&format!("{:02}", date.year().rem_euclid(100)))
                }
                PatternToken::Month2 => out.push_str(&format!("{:02}", date.month())),
                PatternToken::Month => out.push_str(&date.month().to_string()),
                PatternToken::Day2 => out.push_str(&format!("{:02}", date.day())),
                PatternToken::Day => out.push_str(&date.day().to_string()),
                PatternToken::WeekdayLong => out.push_str(&date.format("%A").to_string()),
                PatternToken::WeekdayShort => out.push_str(&date.format("%a").to_string()),
                PatternToken::Week2 => out.push_str(&format!("{:02}", iso_week_number(date))),
                PatternToken::Week => out.push_str(&iso_week_number(date).to_string()),
            }
        }
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::{NaiveDateTime, NaiveTime};

        fn d(s: &str) -> NaiveDate {
            parse_iso_date(s).expect("date")
        }

        fn t(s: &str) -> Option<TimeOfDay> {
            parse_clock(s)
        }

        #[test]
        fn normalize_is_identity_for_valid_clocks() {
            for h in 0..24 {
                for m in 0..60 {
                    let raw = format!("{h:02}:{m:02}");
                    let normalized = normalize_time(&MetaValue::Text(raw.clone()));
                    assert_eq!(normalized.map(|t| t.to_string()), Some(raw));
                }
            }
        }

        #[test]
        fn normalize_extracts_clock_from_iso_datetime() {
            let cases = [
                ("2026-02-07T10:30:00.000+09:00", "10:30"),
                ("2024-01-17T23:05", "23:05"),
                ("2024-01-17 06:45:12", "06:45"),
            ];
            for (raw, want) in cases {
                let got = normalize_time(&MetaValue::Text(raw.to_string()));
                assert_eq!(got.map(|t| t.to_string()).as_deref(), Some(want), "{raw}");
            }
        }

        #[test]
        fn normalize_uses_formatting_capability() {
            let time = NaiveTime::from_hms_opt(22, 15, 40).expect("time");
            assert_eq!(normalize_time(&MetaValue::Time(time)), t("22:15"));
            let dt = NaiveDateTime::parse_from_str("2024-05-01 06:07:00", "%Y-%m-%d %H:%M:%S")
                .expect("datetime");
            assert_eq!(normalize_time(&MetaValue::DateTime(dt)), t("06:07"));
        }

        #[test]
        fn normalize_rejects_everything_else() {
            for raw in [
                MetaValue::Null,
                MetaValue::Text(String::new()),
                MetaValue::Text("soon".into()),
                MetaValue::Text("Today".into()),
                MetaValue::Text("25:00".into()),
                MetaValue::Text("12:60".into()),
                MetaValue::Text("2024-01-17T99:00".into()),
                MetaValue::Integer(2330),
                MetaValue::Bool(true),
            ] {
                assert_eq!(normalize_time(&raw), None, "{raw:?}");
            }
        }

        #[test]
        fn minutes_validate_range() {
            assert_eq!(time_to_minutes("00:00"), Some(0));
            assert_eq!(time_to_minutes("7:30"), Some(450));
            assert_eq!(time_to_minutes("23:59"), Some(1439));
            assert_eq!(time_to_minutes("24:00"), None);
            assert_eq!(time_to_minutes("12:5"), None);
            assert_eq!(time_to_minutes("ab:cd"), None);
        }

        #[test]
        fn sleep_duration_policy() {
            assert_eq!(sleep_duration(t("23:00"), t("07:00")), Some(480));
            assert_eq!(sleep_duration(t("01:00"), t("09:00")), Some(480));
            assert_eq!(sleep_duration(t("07:00"), t("07:00")), Some(0));
            assert_eq!(sleep_duration(None, t("07:00")), None);
            assert_eq!(sleep_duration(t("23:00"), None), None);
        }

        #[test]
        fn weekly_range_is_monday_to_sunday() {
            let wednesday = d("2024-01-17");
            let (start, end) = date_range_for(ViewMode::Weekly, wednesday, DEFAULT_RECENT_DAYS);
            assert_eq!(start, d("2024-01-15"));
            assert_eq!(end, d("2024-01-21"));
            assert!(start <= wednesday && wednesday <= end);

            let sunday = d("2024-01-21");
            assert_eq!(
                date_range_for(ViewMode::Weekly, sunday, DEFAULT_RECENT_DAYS).0,
                d("2024-01-15")
            );
        }

        #[test]
        fn other_ranges() {
            let reference = d("2024-02-10");
            assert_eq!(
                date_range_for(ViewMode::Recent, reference, DEFAULT_RECENT_DAYS),
                (d("2024-01-27"), reference)
            );
            assert_eq!(
                date_range_for(ViewMode::Recent, reference, 1),
                (reference, reference)
            );
            assert_eq!(
                date_range_for(ViewMode::Monthly, reference, DEFAULT_RECENT_DAYS),
                (d("2024-02-01"), d("2024-02-29"))
            );
            assert_eq!(
                date_range_for(ViewMode::Yearly, reference, DEFAULT_RECENT_DAYS),
                (d("2024-01-01"), d("2024-12-31"))
            );
        }

        #[test]
        fn oversized_recent_window_saturates() {
            let reference = d("2024-01-17");
            assert_eq!(
                date_range_for(ViewMode::Recent, reference, u32::MAX),
                (NaiveDate::MIN, reference)
            );
        }

        #[test]
        fn iso_week_boundaries() {
            // 2021-01-01 is a Friday: still week 53 of 2020.
            assert_eq!(iso_week_number(d("2021-01-01")), 53);
            // 2024-12-30 is the Monday of week 1 of 2025.
            assert_eq!(iso_week_number(d("2024-12-30")), 1);
            assert_eq!(iso_week_number(d("2023-02-08")), 6);
        }

        #[test]
        fn enumerate_dates_crosses_month() {
            let got: Vec<String> = enumerate_dates(d("2024-01-30"), d("2024-02-02"))
                .into_iter()
                .map(|d| d.to_string())
                .collect();
            assert_eq!(
                got,
                ["2024-01-30", "2024-01-31", "2024-02-01", "2024-02-02"]
            );
            assert!(enumerate_dates(d("2024-02-02"), d("2024-01-30")).is_empty());
        }

        #[test]
        fn file_name_patterns() {
            assert_eq!(
                format_with_pattern("YYYY-MM-DD ddd", d("2023-01-18")),
                "2023-01-18 Wed"
            );
            assert_eq!(
                format_with_pattern("YYYY [Week] WW", d("2023-02-08")),
                "2023 Week 06"
            );
            assert_eq!(format_with_pattern("YYYY-MM", d("2024-01-31")), "2024-01");
            assert_eq!(
                format_with_pattern("GGGG-[W]WW", d("2024-12-30")),
                "2025-W01"
            );
            assert_eq!(format_with_pattern("D/M/YY", d("2024-03-05")), "5/3/24");
        }

        #[test]
        fn labels_and_durations() {
            let korean: Vec<String> = ["일", "월", "화", "수", "목", "금", "토"]
                .iter()
                .map(|s| s.to_string())
                .collect();
            assert_eq!(format_date_label(d("2024-01-17"), &korean), "24-01-17 수");
            assert_eq!(format_date_label(d("2024-01-17"), &[]), "24-01-17 Wed");
            assert_eq!(format_minutes_hm(485), "8h 05m");
            assert_eq!(format_minutes_hm(0), "0h 00m");
        }
    }
}

pub mod config {
    //! Settings: where notes live, how they are named, and which metadata keys
    //! and section headers back which fields.

    use crate::core::{Field, FieldKind, Locator, NoteKind};
    use crate::dates::{DEFAULT_RECENT_DAYS, MAX_RECENT_DAYS, format_with_pattern};
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::{
        collections::BTreeSet,
        fs,
        path::{Path, PathBuf},
    };

    #[derive(Debug, thiserror::Error)]
    pub enum ConfigError {
        #[error("reading settings {path:?}: {source}")]
        Read {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("parsing settings: {0}")]
        Parse(#[from] serde_json::Error),
        #[error("invalid settings: {0}")]
        Invalid(String),
    }

    /* ------------------------------ Note layout ------------------------------ */

    /// Folder and file name pattern per note kind (vault-relative).
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct NoteLayout {
        pub daily_notes_folder: String,
        pub weekly_notes_folder: String,
        pub monthly_notes_folder: String,
        pub daily_format: String,
        pub weekly_format: String,
        pub monthly_format: String,
    }

    impl Default for NoteLayout {
        fn default() -> Self {
            Self {
                daily_notes_folder: "Area/Daily/Days".into(),
                weekly_notes_folder: "Area/Daily/Weeks".into(),
                monthly_notes_folder: "Area/Daily/Months".into(),
                daily_format: "YYYY-MM-DD ddd".into(),
                weekly_format: "YYYY [Week] WW".into(),
                monthly_format: "YYYY-MM".into(),
            }
        }
    }

    impl NoteLayout {
        pub fn folder(&self, kind: NoteKind) -> &str {
            match kind {
                NoteKind::Daily => &self.daily_notes_folder,
                NoteKind::Weekly => &self.weekly_notes_folder,
                NoteKind::Monthly => &self.monthly_notes_folder,
            }
        }

        pub fn pattern(&self, kind: NoteKind) -> &str {
            match kind {
                NoteKind::Daily => &self.daily_format,
                NoteKind::Weekly => &self.weekly_format,
                NoteKind::Monthly => &self.monthly_format,
            }
        }

        /// File name without extension, e.g. `2023-01-18 Wed`.
        pub fn file_stem(&self, kind: NoteKind, date: NaiveDate) -> String {
            format_with_pattern(self.pattern(kind), date)
        }

        pub fn locator_for(&self, kind: NoteKind, date: NaiveDate) -> Locator {
            let raw = format!("{}/{}.md", self.folder(kind), self.file_stem(kind, date));
            Locator(normalize_path(&raw))
        }
    }

    /// Collapses separators and drops empty and `.` segments.
    pub fn normalize_path(raw: &str) -> String {
        raw.split(['/', '\\'])
            .filter(|s| !s.is_empty() && *s != ".")
            .collect::<Vec<_>>()
            .join("/")
    }

    /* ------------------------------ Field table ------------------------------ */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HeaderOverride {
        pub kind: NoteKind,
        pub header: String,
    }

    /// Section headers backing one text field.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SectionBinding {
        pub field: Field,
        /// Read in priority order; the first header present wins.
        pub headers: Vec<String>,
        /// Header written for particular note kinds instead of the default.
        #[serde(default)]
        pub write_overrides: Vec<HeaderOverride>,
    }

    /// Bidirectional mapping between document keys/headers and record fields.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct FieldTable {
        /// Metadata label → field.
        pub metadata: IndexMap<String, Field>,
        pub sections: Vec<SectionBinding>,
    }

    impl Default for FieldTable {
        fn default() -> Self {
            let metadata = [
                ("취침", Field::Bedtime),
                ("기상", Field::WakeTime),
                ("스크린타임", Field::ScreenTime),
                ("운동", Field::Exercise),
                ("독서", Field::Reading),
                ("금주", Field::Sobriety),
                ("평가", Field::Rating),
            ]
            .into_iter()
            .map(|(k, f)| (k.to_string(), f))
            .collect();

            let sections = vec![
                SectionBinding {
                    field: Field::Tasks,
                    headers: vec!["Todo".into(), "Tasks".into()],
                    write_overrides: vec![HeaderOverride {
                        kind: NoteKind::Daily,
                        header: "Todo".into(),
                    }],
                },
                SectionBinding {
                    field: Field::Journal,
                    headers: vec!["Journal".into()],
                    write_overrides: vec![],
                },
                SectionBinding {
                    field: Field::Goal,
                    headers: vec!["Goal".into()],
                    write_overrides: vec![],
                },
            ];

            Self { metadata, sections }
        }
    }

    impl FieldTable {
        pub fn metadata(&self) -> impl Iterator<Item = (&str, Field)> {
            self.metadata.iter().map(|(k, f)| (k.as_str(), *f))
        }

        pub fn field_for_key(&self, key: &str) -> Option<Field> {
            self.metadata.get(key).copied()
        }

        pub fn key_for(&self, field: Field) -> Option<&str> {
            self.metadata
                .iter()
                .find(|(_, f)| **f == field)
                .map(|(k, _)| k.as_str())
        }

        pub fn binding(&self, field: Field) -> Option<&SectionBinding> {
            self.sections.iter().find(|b| b.field == field)
        }

        /// Every header the parser needs to recognize.
        pub fn section_headers(&self) -> Vec<String> {
            let mut out: Vec<String> = Vec::new();
            for binding in &self.sections {
                let overrides = binding.write_overrides.iter().map(|o| &o.header);
                for header in binding.headers.iter().chain(overrides) {
                    if !out.iter().any(|h| h.eq_ignore_ascii_case(header)) {
                        out.push(header.clone());
                    }
                }
            }
            out
        }

        /// Header a text field is written under in a `kind` note.
        pub fn write_header(&self, field: Field, kind: NoteKind) -> String {
            self.binding(field)
                .and_then(|b| b.write_overrides.iter().find(|o| o.kind == kind))
                .map(|o| o.header.clone())
                .unwrap_or_else(|| field.default_header())
        }

        pub fn validate(&self) -> Result<(), ConfigError> {
            let mut seen = BTreeSet::new();
            for (key, field) in &self.metadata {
                if key.trim().is_empty() || key.contains(['\n', '\r']) {
                    return Err(ConfigError::Invalid(format!(
                        "metadata key {key:?} is not a single-line label"
                    )));
                }
                if field.kind() == FieldKind::Text {
                    return Err(ConfigError::Invalid(format!(
                        "`{field}` is a section field and cannot map to metadata key `{key}`"
                    )));
                }
                if !seen.insert(*field) {
                    return Err(ConfigError::Invalid(format!(
                        "`{field}` is mapped to more than one metadata key"
                    )));
                }
            }

            let mut bound = BTreeSet::new();
            for binding in &self.sections {
                if binding.field.kind() != FieldKind::Text {
                    return Err(ConfigError::Invalid(format!(
                        "`{}` is a metadata field and cannot bind to a section",
                        binding.field
                    )));
                }
                if !bound.insert(binding.field) {
                    return Err(ConfigError::Invalid(format!(
                        "`{}` has more than one section binding",
                        binding.field
                    )));
                }
                let headers = binding
                    .headers
                    .iter()
                    .chain(binding.write_overrides.iter().map(|o| &o.header));
                for header in headers {
                    if crate::parser::parse_section_header(&format!("### {header}")).is_none()
                        || header.contains(['\n', '\r'])
                    {
                        return Err(ConfigError::Invalid(format!(
                            "section header {header:?} for `{}` is empty or multi-line",
                            binding.field
                        )));
                    }
                }
            }
            Ok(())
        }
    }

    /* -------------------------------- Settings -------------------------------- */

    /// Settings file shape: the layout keys sit at the top level.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Settings {
        #[serde(flatten)]
        pub layout: NoteLayout,
        /// Length of the `recent` view in days.
        pub recent_days: u32,
        pub fields: FieldTable,
        /// Sunday-first weekday names used in date labels.
        pub weekday_labels: Vec<String>,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                layout: NoteLayout::default(),
                recent_days: DEFAULT_RECENT_DAYS,
                fields: FieldTable::default(),
                weekday_labels: ["일", "월", "화", "수", "목", "금", "토"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            }
        }
    }

    impl Settings {
        /// Parses a JSON settings document; missing keys keep their defaults.
        pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
            let settings: Settings = serde_json::from_str(text)?;
            settings.validate()?;
            Ok(settings)
        }

        pub fn load(path: &Path) -> Result<Self, ConfigError> {
            let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_json_str(&text)
        }

        pub fn validate(&self) -> Result<(), ConfigError> {
            if !(1..=MAX_RECENT_DAYS).contains(&self.recent_days) {
                return Err(ConfigError::Invalid(format!(
                    "recentDays must be between 1 and {MAX_RECENT_DAYS}, got {}",
                    self.recent_days
                )));
            }
            if self.weekday_labels.len() != 7 {
                return Err(ConfigError::Invalid(format!(
                    "weekdayLabels needs 7 entries, got {}",
                    self.weekday_labels.len()
                )));
            }
            self.fields.validate()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn default_locators_follow_note_naming() {
            let layout = NoteLayout::default();
            let day = NaiveDate::from_ymd_opt(2023, 1, 18).unwrap();
            assert_eq!(
                layout.locator_for(NoteKind::Daily, day).as_str(),
                "Area/Daily/Days/2023-01-18 Wed.md"
            );
            let week = NaiveDate::from_ymd_opt(2023, 2, 8).unwrap();
            assert_eq!(
                layout.locator_for(NoteKind::Weekly, week).as_str(),
                "Area/Daily/Weeks/2023 Week 06.md"
            );
            assert_eq!(
                layout.locator_for(NoteKind::Monthly, day).as_str(),
                "Area/Daily/Months/2023-01.md"
            );
        }

        #[test]
        fn partial_settings_merge_over_defaults() {
            let settings = Settings::from_json_str(
                r#"{ "dailyNotesFolder": "/Journal//Days/", "dailyFormat": "YYYYMMDD", "recentDays": 7 }"#,
            )
            .expect("settings");
            assert_eq!(settings.recent_days, 7);
            assert_eq!(settings.layout.weekly_format, "YYYY [Week] WW");
            let day = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
            assert_eq!(
                settings.layout.locator_for(NoteKind::Daily, day).as_str(),
                "Journal/Days/20240309.md"
            );
            assert_eq!(settings.fields, FieldTable::default());
        }

        #[test]
        fn field_table_is_bidirectional() {
            let table = FieldTable::default();
            assert_eq!(table.field_for_key("기상"), Some(Field::WakeTime));
            assert_eq!(table.key_for(Field::Rating), Some("평가"));
            assert_eq!(table.key_for(Field::Tasks), None);
            assert_eq!(table.write_header(Field::Tasks, NoteKind::Daily), "Todo");
            assert_eq!(table.write_header(Field::Tasks, NoteKind::Weekly), "Tasks");
            assert_eq!(table.write_header(Field::Goal, NoteKind::Monthly), "Goal");
            assert_eq!(table.section_headers(), ["Todo", "Tasks", "Journal", "Goal"]);
        }

        #[test]
        fn custom_field_table_from_json() {
            let settings = Settings::from_json_str(
                r#"{ "fields": {
                    "metadata": { "bed": "bedtime", "wake": "wakeTime" },
                    "sections": [ { "field": "journal", "headers": ["Diary"] } ]
                } }"#,
            )
            .expect("settings");
            assert_eq!(settings.fields.key_for(Field::Bedtime), Some("bed"));
            assert_eq!(settings.fields.section_headers(), ["Diary"]);
        }

        #[test]
        fn invalid_tables_are_rejected() {
            let dup = r#"{ "fields": { "metadata": { "a": "rating", "b": "rating" } } }"#;
            assert!(matches!(
                Settings::from_json_str(dup),
                Err(ConfigError::Invalid(_))
            ));
            let text_in_meta = r#"{ "fields": { "metadata": { "j": "journal" } } }"#;
            assert!(matches!(
                Settings::from_json_str(text_in_meta),
                Err(ConfigError::Invalid(_))
            ));
            let labels = r#"{ "weekdayLabels": ["Sun"] }"#;
            assert!(matches!(
                Settings::from_json_str(labels),
                Err(ConfigError::Invalid(_))
            ));
            assert!(matches!(
                Settings::from_json_str("{ not json"),
                Err(ConfigError::Parse(_))
            ));
        }

        #[test]
        fn recent_days_are_bounded() {
            for days in ["0", "3661", "4294967295"] {
                let json = format!(r#"{{ "recentDays": {days} }}"#);
                assert!(
                    matches!(Settings::from_json_str(&json), Err(ConfigError::Invalid(_))),
                    "{days}"
                );
            }
            let longest = Settings::from_json_str(r#"{ "recentDays": 3660 }"#).expect("settings");
            assert_eq!(longest.recent_days, MAX_RECENT_DAYS);
        }
    }
}

pub mod parser {
    //! Metadata block and `### Header` section extraction.
    //!
    //! Parsing never fails: a malformed metadata block reads as an empty map and
    //! lines that are not section headers are ordinary body text.

    use crate::core::{MetaValue, MetadataMap, SectionMap, SourceRange, header_key};
    use log::debug;
    use nom::{
        IResult,
        bytes::complete::tag,
        character::complete::space1,
        combinator::rest,
        error::VerboseError,
        sequence::preceded,
    };

    pub const METADATA_DELIMITER: &str = "---";
    pub const SECTION_MARKER: &str = "###";

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /* ------------------------------- Lines ------------------------------- */

    /// One line of a document: `start..end` excludes the newline, `next` is the
    /// offset of the following line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct LineSpan {
        pub start: usize,
        pub end: usize,
        pub next: usize,
    }

    impl LineSpan {
        pub fn text<'a>(&self, doc: &'a str) -> &'a str {
            &doc[self.start..self.end]
        }
    }

    pub(crate) fn line_spans(doc: &str) -> Vec<LineSpan> {
        let mut out = Vec::new();
        let mut start = 0;
        while start < doc.len() {
            match doc[start..].find('\n') {
                Some(rel) => {
                    let end = start + rel;
                    out.push(LineSpan {
                        start,
                        end,
                        next: end + 1,
                    });
                    start = end + 1;
                }
                None => {
                    out.push(LineSpan {
                        start,
                        end: doc.len(),
                        next: doc.len(),
                    });
                    break;
                }
            }
        }
        out
    }

    /* --------------------------- Document layout --------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MetadataBlock {
        /// Text strictly between the two delimiter lines.
        pub inner: SourceRange,
        /// The closing delimiter line, newline included.
        pub closing: SourceRange,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DocumentLayout {
        pub metadata: Option<MetadataBlock>,
        /// Offset where the body (everything after the metadata block) starts.
        pub body_start: usize,
    }

    fn is_delimiter(line: &str) -> bool {
        line.trim_end() == METADATA_DELIMITER
    }

    /// Locates the metadata block: the document must open with a delimiter line
    /// and a second delimiter line must follow.
    pub fn document_layout(doc: &str) -> DocumentLayout {
        let no_block = DocumentLayout {
            metadata: None,
            body_start: 0,
        };
        let lines = line_spans(doc);
        let Some(first) = lines.first() else {
            return no_block;
        };
        if !is_delimiter(first.text(doc)) {
            return no_block;
        }
        lines[1..]
            .iter()
            .find(|line| is_delimiter(line.text(doc)))
            .map(|closing| DocumentLayout {
                metadata: Some(MetadataBlock {
                    inner: SourceRange {
                        start: first.next,
                        end: closing.start,
                    },
                    closing: SourceRange {
                        start: closing.start,
                        end: closing.next,
                    },
                }),
                body_start: closing.next,
            })
            .unwrap_or(no_block)
    }

    /// Everything after the metadata block (the whole document when there is none).
    pub fn body(doc: &str) -> &str {
        &doc[document_layout(doc).body_start..]
    }

    /* ------------------------------- Metadata ------------------------------- */

    /// Reads the metadata block as a YAML mapping. A missing, empty, malformed
    /// or non-mapping block reads as an empty map.
    pub fn parse_metadata(doc: &str) -> MetadataMap {
        let Some(block) = document_layout(doc).metadata else {
            return MetadataMap::new();
        };
        let raw = block.inner.slice(doc);
        if raw.trim().is_empty() {
            return MetadataMap::new();
        }
        match serde_yaml::from_str::<serde_yaml::Value>(raw) {
            Ok(serde_yaml::Value::Mapping(mapping)) => mapping
                .into_iter()
                .filter_map(|(k, v)| Some((yaml_key(k)?, meta_value_from_yaml(v))))
                .collect(),
            Ok(serde_yaml::Value::Null) => MetadataMap::new(),
            Ok(_) => {
                debug!("event=metadata_ignored module=parser reason=not_a_mapping");
                MetadataMap::new()
            }
            Err(err) => {
                debug!("event=metadata_ignored module=parser reason=malformed error={err}");
                MetadataMap::new()
            }
        }
    }

    fn yaml_key(key: serde_yaml::Value) -> Option<String> {
        match key {
            serde_yaml::Value::String(s) => Some(s),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn meta_value_from_yaml(value: serde_yaml::Value) -> MetaValue {
        use serde_yaml::Value;
        match value {
            Value::Null => MetaValue::Null,
            Value::Bool(b) => MetaValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => MetaValue::Integer(i),
                None => MetaValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => MetaValue::Text(s),
            Value::Tagged(tagged) => meta_value_from_yaml(tagged.value),
            nested @ (Value::Sequence(_) | Value::Mapping(_)) => {
                let flow = serde_json::to_string(&nested).or_else(|_| {
                    serde_yaml::to_string(&nested).map(|s| s.trim_end().to_string())
                });
                MetaValue::Other(flow.unwrap_or_default())
            }
        }
    }

    /// Reads one scalar the way it would be read from a metadata line
    /// (`true` → bool, `8` → integer, `23:30` → text, empty → null).
    pub fn parse_scalar(raw: &str) -> MetaValue {
        if raw.trim().is_empty() {
            return MetaValue::Null;
        }
        match serde_yaml::from_str::<serde_yaml::Value>(raw) {
            Ok(value) => meta_value_from_yaml(value),
            Err(_) => MetaValue::Text(raw.to_string()),
        }
    }

    /* ------------------------------- Sections ------------------------------- */

    fn header_line(i: &str) -> PResult<'_, &str> {
        preceded(tag(SECTION_MARKER), preceded(space1, rest))(i)
    }

    /// Header text of a `### Header` line, or `None` for any other line.
    pub fn parse_section_header(line: &str) -> Option<&str> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        let (_, name) = header_line(line).ok()?;
        let name = name.trim();
        (!name.is_empty()).then_some(name)
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct SectionHeader {
        pub name: String,
        pub line: LineSpan,
    }

    /// Every section header line at or after `from`, in document order.
    pub(crate) fn section_headers(doc: &str, from: usize) -> Vec<SectionHeader> {
        line_spans(doc)
            .into_iter()
            .filter(|line| line.start >= from)
            .filter_map(|line| {
                parse_section_header(line.text(doc)).map(|name| SectionHeader {
                    name: name.to_string(),
                    line,
                })
            })
            .collect()
    }

    /// Extracts the sections named in its header list.
    ///
    /// Every `###` header line bounds the previous section, recognized or not;
    /// only recognized headers end up in the map.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SectionParser {
        headers: Vec<String>,
    }

    impl SectionParser {
        pub fn new<I, S>(headers: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: AsRef<str>,
        {
            Self {
                headers: headers
                    .into_iter()
                    .map(|h| header_key(h.as_ref()))
                    .collect(),
            }
        }

        pub fn recognizes(&self, header: &str) -> bool {
            let key = header_key(header);
            self.headers.iter().any(|h| *h == key)
        }

        pub fn parse(&self, doc: &str) -> SectionMap {
            let layout = document_layout(doc);
            let headers = section_headers(doc, layout.body_start);
            let mut sections = SectionMap::default();
            for (idx, header) in headers.iter().enumerate() {
                if !self.recognizes(&header.name) {
                    continue;
                }
                let end = headers
                    .get(idx + 1)
                    .map(|next| next.line.start)
                    .unwrap_or(doc.len());
                let start = header.line.next.min(end);
                sections.insert(&header.name, doc[start..end].trim());
            }
            sections
        }
    }

    /// Metadata and sections of one document.
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct ParsedDocument {
        pub metadata: MetadataMap,
        pub sections: SectionMap,
    }

    pub fn parse_document(doc: &str, sections: &SectionParser) -> ParsedDocument {
        ParsedDocument {
            metadata: parse_metadata(doc),
            sections: sections.parse(doc),
        }
    }

}

pub mod format {
    //! Targeted rewrites: one metadata key or one section, everything else kept
    //! byte-for-byte.

    use crate::core::{MetaValue, SourceRange, header_key};
    use crate::parser::{METADATA_DELIMITER, SECTION_MARKER, document_layout, line_spans, section_headers};

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum WriteError {
        #[error("document has no metadata block")]
        NoMetadataBlock,
        #[error("invalid metadata key {0:?}")]
        InvalidKey(String),
        #[error("invalid section header {0:?}")]
        InvalidHeader(String),
    }

    /* ------------------------------- Metadata ------------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct MetadataEntry {
        key: String,
        /// Key line plus continuation lines, trailing newline included.
        span: SourceRange,
        /// Absolute offset of the `:` ending the key.
        colon: usize,
        /// Line ending of the key line.
        eol: &'static str,
    }

    /// Key of a top-level `key: value` line and the offset of its colon.
    fn metadata_line_key(line: &str) -> Option<(String, usize)> {
        let line = line.trim_end();
        let first = line.chars().next()?;
        if first.is_whitespace() || first == '#' || first == '-' {
            return None;
        }
        if first == '"' || first == '\'' {
            let (key, after) = split_quoted(line, first)?;
            let rest = after.trim_start();
            if !rest.starts_with(':') {
                return None;
            }
            return Some((key, line.len() - rest.len()));
        }
        let colon = line.char_indices().find_map(|(idx, c)| {
            let next = line[idx + c.len_utf8()..].chars().next();
            (c == ':' && next.is_none_or(|n| n == ' ' || n == '\t')).then_some(idx)
        })?;
        Some((line[..colon].trim_end().to_string(), colon))
    }

    /// Splits a quoted key off the front of `line`.
    fn split_quoted(line: &str, quote: char) -> Option<(String, &str)> {
        let mut escaped = false;
        let mut chars = line.char_indices().skip(1);
        while let Some((idx, c)) = chars.next() {
            if quote == '"' && escaped {
                escaped = false;
                continue;
            }
            if quote == '"' && c == '\\' {
                escaped = true;
                continue;
            }
            if c != quote {
                continue;
            }
            if quote == '\'' && line[idx + 1..].starts_with('\'') {
                chars.next();
                continue;
            }
            let end = idx + 1;
            let key = if quote == '"' {
                serde_json::from_str::<String>(&line[..end]).ok()?
            } else {
                line[1..idx].replace("''", "'")
            };
            return Some((key, &line[end..]));
        }
        None
    }

    fn is_blank(line: &str) -> bool {
        line.trim().is_empty()
    }

    fn is_continuation(line: &str) -> bool {
        !is_blank(line) && line.starts_with([' ', '\t', '-'])
    }

    fn line_ending(line: &str) -> &'static str {
        if line.ends_with("\r\n") { "\r\n" } else { "\n" }
    }

    /// Top-level entries of the block. Blank lines belong to an entry only when
    /// a continuation line follows them, so trailing blanks stay outside spans.
    fn metadata_entries(doc: &str, inner: SourceRange) -> Vec<MetadataEntry> {
        let mut out: Vec<MetadataEntry> = Vec::new();
        // End of the last entry counting blank lines not yet claimed by it.
        let mut reach = None;
        let lines = line_spans(doc)
            .into_iter()
            .filter(|l| l.start >= inner.start && l.start < inner.end);
        for line in lines {
            let text = line.text(doc);
            if let Some((key, colon)) = metadata_line_key(text) {
                out.push(MetadataEntry {
                    key,
                    span: SourceRange {
                        start: line.start,
                        end: line.next,
                    },
                    colon: line.start + colon,
                    eol: line_ending(&doc[line.start..line.next]),
                });
                reach = Some(line.next);
            } else if reach == Some(line.start) && is_blank(text) {
                reach = Some(line.next);
            } else if reach == Some(line.start) && is_continuation(text) {
                if let Some(last) = out.last_mut() {
                    last.span.end = line.next;
                }
                reach = Some(line.next);
            } else {
                reach = None;
            }
        }
        out
    }

    fn validate_key(key: &str) -> Result<(), WriteError> {
        if key.trim().is_empty() || key.contains(['\n', '\r']) {
            return Err(WriteError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// Text that reads back as exactly itself when written unquoted.
    fn is_plain_safe(text: &str) -> bool {
        const INDICATORS: [char; 19] = [
            '-', '?', ':', ',', '[', ']', '{', '}', '#', '&', '*', '!', '|', '>', '\'', '"', '%',
            '@', '`',
        ];
        if text.is_empty()
            || text.trim() != text
            || text.contains(['\n', '\r', '\t'])
            || text.contains(": ")
            || text.contains(" #")
            || text.ends_with(':')
            || text.starts_with(INDICATORS)
        {
            return false;
        }
        matches!(
            serde_yaml::from_str::<serde_yaml::Value>(text),
            Ok(serde_yaml::Value::String(ref s)) if s == text
        )
    }

    fn plain_or_quoted(text: &str) -> String {
        if is_plain_safe(text) {
            text.to_string()
        } else {
            serde_json::to_string(text).unwrap_or_else(|_| format!("{text:?}"))
        }
    }

    /// YAML rendering of one scalar, unquoted whenever that reads back the same.
    pub fn render_scalar(value: &MetaValue) -> String {
        match value {
            MetaValue::Null => String::new(),
            MetaValue::Bool(b) => b.to_string(),
            MetaValue::Integer(n) => n.to_string(),
            MetaValue::Float(f) if f.is_nan() => ".nan".into(),
            MetaValue::Float(f) if f.is_infinite() => {
                if *f > 0.0 { ".inf".into() } else { "-.inf".into() }
            }
            MetaValue::Float(f) if f.fract() == 0.0 => format!("{f:.1}"),
            MetaValue::Float(f) => f.to_string(),
            MetaValue::Text(s) => plain_or_quoted(s),
            MetaValue::Time(_) | MetaValue::DateTime(_) => plain_or_quoted(&value.to_string()),
            MetaValue::Other(flow) => flow.clone(),
        }
    }

    /// `key_text` is the key as it should appear, colon included.
    fn render_entry(key_text: &str, value: &MetaValue, eol: &str) -> String {
        let rendered = render_scalar(value);
        if rendered.is_empty() {
            format!("{key_text}{eol}")
        } else {
            format!("{key_text} {rendered}{eol}")
        }
    }

    /// Sets (`Some`) or removes (`None`) one key inside the existing metadata
    /// block. The key's line and its indented/list continuation lines are the
    /// only bytes touched; new keys go right before the closing delimiter.
    pub fn write_metadata_key(
        doc: &str,
        key: &str,
        value: Option<&MetaValue>,
    ) -> Result<String, WriteError> {
        validate_key(key)?;
        let block = document_layout(doc)
            .metadata
            .ok_or(WriteError::NoMetadataBlock)?;
        let entries = metadata_entries(doc, block.inner);
        let existing = entries.iter().find(|e| e.key == key);

        let mut out = String::with_capacity(doc.len() + key.len() + 16);
        match (existing, value) {
            (Some(entry), Some(v)) => {
                out.push_str(&doc[..entry.span.start]);
                out.push_str(&render_entry(
                    &doc[entry.span.start..=entry.colon],
                    v,
                    entry.eol,
                ));
                out.push_str(&doc[entry.span.end..]);
            }
            (Some(entry), None) => {
                out.push_str(&doc[..entry.span.start]);
                out.push_str(&doc[entry.span.end..]);
            }
            (None, Some(v)) => {
                out.push_str(&doc[..block.closing.start]);
                let eol = line_ending(&doc[..block.inner.start]);
                out.push_str(&render_entry(&format!("{}:", plain_or_quoted(key)), v, eol));
                out.push_str(&doc[block.closing.start..]);
            }
            (None, None) => out.push_str(doc),
        }
        Ok(out)
    }

    /// Prepends an empty metadata block when the document has none.
    pub fn ensure_metadata_block(doc: &str) -> String {
        if document_layout(doc).metadata.is_some() {
            return doc.to_string();
        }
        format!("{METADATA_DELIMITER}\n{METADATA_DELIMITER}\n{doc}")
    }

    /// Metadata accessor semantics: creates the block on demand, and removing a
    /// key from a document without a block is a no-op.
    pub fn apply_metadata_patch(
        doc: &str,
        key: &str,
        value: Option<&MetaValue>,
    ) -> Result<String, WriteError> {
        if value.is_none() && document_layout(doc).metadata.is_none() {
            validate_key(key)?;
            return Ok(doc.to_string());
        }
        write_metadata_key(&ensure_metadata_block(doc), key, value)
    }

    /* ------------------------------- Sections ------------------------------- */

    /// Replaces the body of the first `### <header>` section (case-insensitive),
    /// or appends the section when it is missing.
    ///
    /// Only the text between the header line and the next header line (or EOF)
    /// changes. The new body is trimmed and separated by exactly one newline on
    /// each side, so repeating the call is a no-op.
    pub fn replace_section(doc: &str, header: &str, new_body: &str) -> Result<String, WriteError> {
        let header = header.trim();
        if header.is_empty() || header.contains(['\n', '\r']) {
            return Err(WriteError::InvalidHeader(header.to_string()));
        }
        let body = new_body.trim();
        let wanted = header_key(header);
        let layout = document_layout(doc);
        let headers = section_headers(doc, layout.body_start);

        let Some(idx) = headers.iter().position(|h| header_key(&h.name) == wanted) else {
            return Ok(append_section(doc, header, body));
        };
        let found = &headers[idx];
        let tail = headers
            .get(idx + 1)
            .map(|next| next.line.start)
            .unwrap_or(doc.len());

        let mut out = String::with_capacity(doc.len() + body.len());
        out.push_str(&doc[..found.line.end]);
        out.push('\n');
        if !body.is_empty() {
            out.push_str(body);
            out.push('\n');
        }
        out.push_str(&doc[tail..]);
        Ok(out)
    }

    fn append_section(doc: &str, header: &str, body: &str) -> String {
        let mut out = String::with_capacity(doc.len() + header.len() + body.len() + 8);
        out.push_str(doc);
        if !doc.trim().is_empty() {
            if !doc.ends_with('\n') {
                out.push('\n');
            }
            if !out.ends_with("\n\n") {
                out.push('\n');
            }
        }
        out.push_str(SECTION_MARKER);
        out.push(' ');
        out.push_str(header);
        out.push('\n');
        if !body.is_empty() {
            out.push_str(body);
            out.push('\n');
        }
        out
    }

}

pub mod mapper {
    //! Raw metadata/sections ↔ typed records, driven by a `FieldTable`.

    use crate::config::FieldTable;
    use crate::core::{
        DayRecord, DomainError, Field, FieldKind, Locator, MetaValue, NoteKind, PeriodGoal,
    };
    use crate::dates::normalize_time;
    use crate::format::{WriteError, apply_metadata_patch, replace_section};
    use crate::parser::{ParsedDocument, SectionParser, parse_document};
    use chrono::NaiveDate;

    /// Where an edited field lives in a document.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum WriteTarget {
        Metadata(String),
        Section(String),
    }

    /// A field edit translated into document terms.
    #[derive(Debug, Clone, PartialEq)]
    pub enum RawEdit {
        /// `None` removes the key.
        Metadata {
            key: String,
            value: Option<MetaValue>,
        },
        Section {
            header: String,
            body: String,
        },
    }

    impl RawEdit {
        /// Applies the edit to document text.
        pub fn apply(&self, doc: &str) -> Result<String, WriteError> {
            match self {
                RawEdit::Metadata { key, value } => apply_metadata_patch(doc, key, value.as_ref()),
                RawEdit::Section { header, body } => replace_section(doc, header, body),
            }
        }
    }

    #[derive(Debug, Clone)]
    pub struct EntryMapper {
        table: FieldTable,
        sections: SectionParser,
    }

    impl Default for EntryMapper {
        fn default() -> Self {
            Self::new(FieldTable::default())
        }
    }

    impl EntryMapper {
        pub fn new(table: FieldTable) -> Self {
            let sections = SectionParser::new(table.section_headers());
            Self { table, sections }
        }

        pub fn table(&self) -> &FieldTable {
            &self.table
        }

        pub fn parse(&self, doc: &str) -> ParsedDocument {
            parse_document(doc, &self.sections)
        }

        pub fn read_day(&self, date: NaiveDate, source: Locator, doc: &str) -> DayRecord {
            self.day_from_parsed(date, source, &self.parse(doc))
        }

        pub fn day_from_parsed(
            &self,
            date: NaiveDate,
            source: Locator,
            parsed: &ParsedDocument,
        ) -> DayRecord {
            let mut record = DayRecord::new(date, source);
            for (key, field) in self.table.metadata() {
                if let Some(raw) = parsed.metadata.get(key) {
                    record.assign(field, raw);
                }
            }
            record.tasks = self.section_text(parsed, Field::Tasks);
            record.journal = self.section_text(parsed, Field::Journal);
            record
        }

        pub fn read_goal(
            &self,
            period_label: impl Into<String>,
            source: Locator,
            doc: &str,
        ) -> PeriodGoal {
            PeriodGoal {
                period_label: period_label.into(),
                source,
                content: self.section_text(&self.parse(doc), Field::Goal),
            }
        }

        fn section_text(&self, parsed: &ParsedDocument, field: Field) -> String {
            self.table
                .binding(field)
                .and_then(|b| parsed.sections.first_present(&b.headers))
                .unwrap_or_default()
                .to_string()
        }

        pub fn resolve_target(&self, field: Field, kind: NoteKind) -> Result<WriteTarget, DomainError> {
            match field.kind() {
                FieldKind::Text => Ok(WriteTarget::Section(self.table.write_header(field, kind))),
                _ => self
                    .table
                    .key_for(field)
                    .map(|key| WriteTarget::Metadata(key.to_string()))
                    .ok_or(DomainError::UnmappedField(field)),
            }
        }

        /// Turns a value coming from the presentation layer into a document edit.
        ///
        /// Time values are re-normalized to `HH:MM` here even when they already
        /// look normalized; null removes a metadata key.
        pub fn encode_edit(
            &self,
            field: Field,
            kind: NoteKind,
            value: &MetaValue,
        ) -> Result<RawEdit, DomainError> {
            Ok(match self.resolve_target(field, kind)? {
                WriteTarget::Metadata(key) => RawEdit::Metadata {
                    key,
                    value: encode_metadata_value(field, value),
                },
                WriteTarget::Section(header) => RawEdit::Section {
                    header,
                    body: value.to_string(),
                },
            })
        }
    }

    fn encode_metadata_value(field: Field, value: &MetaValue) -> Option<MetaValue> {
        if value.is_null() {
            return None;
        }
        Some(match field.kind() {
            // Unrecognizable input is stored as given; it reads back as absent.
            FieldKind::Time => normalize_time(value)
                .map(MetaValue::from)
                .unwrap_or_else(|| value.clone()),
            FieldKind::Flag => MetaValue::Bool(value.is_truthy()),
            FieldKind::Rating => match value {
                MetaValue::Text(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(MetaValue::Integer)
                    .unwrap_or_else(|_| value.clone()),
                MetaValue::Float(f) if f.fract() == 0.0 => MetaValue::Integer(*f as i64),
                other => other.clone(),
            },
            FieldKind::Text => value.clone(),
        })
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::parser::parse_metadata;

        const DAY: &str = "---\n취침: 2024-01-16T23:40:00+09:00\n기상: \"07:10\"\n스크린타임: 3:05\n운동: true\n독서: 0\n금주: yes\n평가: 7\nmood: calm\n---\n# Wed\n### Tasks\n- [ ] fallback\n### Todo\n- [x] primary\n### Journal\nWalked.\n";

        fn day() -> NaiveDate {
            NaiveDate::from_ymd_opt(2024, 1, 17).unwrap()
        }

        #[test]
        fn read_direction_coerces_each_field() {
            let mapper = EntryMapper::default();
            let record = mapper.read_day(day(), Locator::from("d.md"), DAY);
            assert_eq!(record.bedtime.map(|t| t.to_string()).as_deref(), Some("23:40"));
            assert_eq!(record.wake_time.map(|t| t.to_string()).as_deref(), Some("07:10"));
            assert_eq!(record.screen_time.map(|t| t.to_string()).as_deref(), Some("03:05"));
            assert!(record.exercise);
            assert!(!record.reading);
            assert!(record.sobriety);
            assert_eq!(record.rating, Some(7));
            assert_eq!(record.tasks, "- [x] primary");
            assert_eq!(record.journal, "Walked.");
            assert_eq!(record.sleep_minutes(), Some(450));
        }

        #[test]
        fn missing_and_bad_values_default_to_absent() {
            let doc = "---\n취침: late\n평가: \"9\"\n---\nno sections\n";
            let record = EntryMapper::default().read_day(day(), Locator::from("d.md"), doc);
            assert_eq!(record, DayRecord::new(day(), Locator::from("d.md")));
            assert_eq!(record.tasks, "");
            assert_eq!(record.journal, "");
        }

        #[test]
        fn tasks_fall_back_to_second_header() {
            let doc = "### Tasks\n- [ ] only tasks\n";
            let record = EntryMapper::default().read_day(day(), Locator::from("d.md"), doc);
            assert_eq!(record.tasks, "- [ ] only tasks");
        }

        #[test]
        fn goal_reads_from_period_note() {
            let doc = "---\ntype: weekly\n---\n### Goal\n- [ ] 3x run\n### Review\nok\n";
            let goal = EntryMapper::default().read_goal("2024 Week 03", Locator::from("w.md"), doc);
            assert_eq!(goal.content, "- [ ] 3x run");
            assert_eq!(goal.period_label, "2024 Week 03");
        }

        #[test]
        fn write_targets_follow_table() {
            let mapper = EntryMapper::default();
            assert_eq!(
                mapper.resolve_target(Field::WakeTime, NoteKind::Daily),
                Ok(WriteTarget::Metadata("기상".into()))
            );
            assert_eq!(
                mapper.resolve_target(Field::Tasks, NoteKind::Daily),
                Ok(WriteTarget::Section("Todo".into()))
            );
            assert_eq!(
                mapper.resolve_target(Field::Tasks, NoteKind::Weekly),
                Ok(WriteTarget::Section("Tasks".into()))
            );
            assert_eq!(
                mapper.resolve_target(Field::Journal, NoteKind::Daily),
                Ok(WriteTarget::Section("Journal".into()))
            );

            let mut table = FieldTable::default();
            table.metadata.shift_remove("평가");
            assert_eq!(
                EntryMapper::new(table).resolve_target(Field::Rating, NoteKind::Daily),
                Err(DomainError::UnmappedField(Field::Rating))
            );
        }

        #[test]
        fn encode_renormalizes_times() {
            let mapper = EntryMapper::default();
            let edit = mapper
                .encode_edit(
                    Field::Bedtime,
                    NoteKind::Daily,
                    &MetaValue::from("2024-01-16T23:55:00.000+09:00"),
                )
                .unwrap();
            assert_eq!(
                edit,
                RawEdit::Metadata {
                    key: "취침".into(),
                    value: Some(MetaValue::from("23:55")),
                }
            );
            let out = edit.apply(DAY).unwrap();
            assert_eq!(parse_metadata(&out)["취침"], MetaValue::from("23:55"));
        }

        #[test]
        fn encode_coerces_flags_ratings_and_null() {
            let mapper = EntryMapper::default();
            let flag = mapper
                .encode_edit(Field::Reading, NoteKind::Daily, &MetaValue::Integer(1))
                .unwrap();
            assert_eq!(
                flag,
                RawEdit::Metadata {
                    key: "독서".into(),
                    value: Some(MetaValue::Bool(true)),
                }
            );
            let rating = mapper
                .encode_edit(Field::Rating, NoteKind::Daily, &MetaValue::from(" 6 "))
                .unwrap();
            assert_eq!(
                rating,
                RawEdit::Metadata {
                    key: "평가".into(),
                    value: Some(MetaValue::Integer(6)),
                }
            );
            let cleared = mapper
                .encode_edit(Field::ScreenTime, NoteKind::Daily, &MetaValue::Null)
                .unwrap();
            let out = cleared.apply(DAY).unwrap();
            assert!(!out.contains("스크린타임"));
        }

        #[test]
        fn unchanged_fields_round_trip() {
            let mapper = EntryMapper::default();
            let source = Locator::from("d.md");
            let original = mapper.read_day(day(), source.clone(), DAY);

            let mut doc = DAY.to_string();
            for field in Field::DAY_FIELDS {
                let edit = mapper
                    .encode_edit(field, NoteKind::Daily, &original.field_value(field))
                    .unwrap();
                doc = edit.apply(&doc).unwrap();
            }
            assert_eq!(mapper.read_day(day(), source, &doc), original);
        }

        #[test]
        fn unchanged_normalized_field_is_byte_identical() {
            let doc = "---\n취침: 23:30\n운동: false\n---\n### Todo\n- [ ] a\n";
            let mapper = EntryMapper::default();
            let record = mapper.read_day(day(), Locator::from("d.md"), doc);
            for field in [Field::Bedtime, Field::Exercise, Field::Tasks] {
                let edit = mapper
                    .encode_edit(field, NoteKind::Daily, &record.field_value(field))
                    .unwrap();
                assert_eq!(edit.apply(doc).unwrap(), doc, "{field}");
            }
        }
    }
}

pub mod storage {
    //! Document store collaborator: load text by locator, persist edits with an
    //! atomic read-modify-write.

    use crate::core::{Locator, MetaValue};
    use crate::format::{WriteError, apply_metadata_patch};
    use log::{debug, info};
    use std::{
        collections::BTreeMap,
        fs, io,
        path::{Component, Path, PathBuf},
        sync::Mutex,
    };

    #[derive(Debug, thiserror::Error)]
    pub enum StoreError {
        #[error("document not found: {0}")]
        NotFound(Locator),
        #[error("locator {0} escapes the store root")]
        InvalidLocator(Locator),
        #[error("I/O error on {locator}: {source}")]
        Io {
            locator: Locator,
            #[source]
            source: io::Error,
        },
        #[error("edit rejected for {locator}: {source}")]
        Edit {
            locator: Locator,
            #[source]
            source: WriteError,
        },
        #[error("document store lock poisoned")]
        Poisoned,
    }

    impl StoreError {
        pub fn is_not_found(&self) -> bool {
            matches!(self, StoreError::NotFound(_))
        }
    }

    /// Text transform run inside `write_atomic`.
    pub type Transform<'a> = dyn Fn(&str) -> Result<String, WriteError> + 'a;

    pub trait DocumentStore {
        fn exists(&self, locator: &Locator) -> bool;

        fn read(&self, locator: &Locator) -> Result<String, StoreError>;

        /// Runs `transform` on the latest committed text and persists the result
        /// with no other writer interleaved.
        fn write_atomic(&self, locator: &Locator, transform: &Transform<'_>) -> Result<(), StoreError>;

        /// Sets or removes one metadata key atomically.
        fn metadata_patch(
            &self,
            locator: &Locator,
            key: &str,
            value: Option<&MetaValue>,
        ) -> Result<(), StoreError> {
            self.write_atomic(locator, &|doc| apply_metadata_patch(doc, key, value))
        }
    }

    fn edit_error(locator: &Locator, source: WriteError) -> StoreError {
        StoreError::Edit {
            locator: locator.clone(),
            source,
        }
    }

    /* ------------------------------ Filesystem ------------------------------ */

    /// Notes stored as files under a vault root.
    #[derive(Debug)]
    pub struct FsDocumentStore {
        root: PathBuf,
        write_lock: Mutex<()>,
    }

    impl FsDocumentStore {
        pub fn new(root: impl Into<PathBuf>) -> Self {
            Self {
                root: root.into(),
                write_lock: Mutex::new(()),
            }
        }

        pub fn root(&self) -> &Path {
            &self.root
        }

        pub fn path_for(&self, locator: &Locator) -> Result<PathBuf, StoreError> {
            let rel = Path::new(locator.as_str());
            let escapes = rel.as_os_str().is_empty()
                || rel
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if escapes {
                return Err(StoreError::InvalidLocator(locator.clone()));
            }
            Ok(self.root.join(rel))
        }

        fn io_error(locator: &Locator, err: io::Error) -> StoreError {
            if err.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound(locator.clone())
            } else {
                StoreError::Io {
                    locator: locator.clone(),
                    source: err,
                }
            }
        }
    }

    fn temp_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{name}.daylog-tmp"))
    }

    impl DocumentStore for FsDocumentStore {
        fn exists(&self, locator: &Locator) -> bool {
            self.path_for(locator).map(|p| p.is_file()).unwrap_or(false)
        }

        fn read(&self, locator: &Locator) -> Result<String, StoreError> {
            let path = self.path_for(locator)?;
            fs::read_to_string(&path).map_err(|e| Self::io_error(locator, e))
        }

        fn write_atomic(&self, locator: &Locator, transform: &Transform<'_>) -> Result<(), StoreError> {
            let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
            let path = self.path_for(locator)?;
            let current = fs::read_to_string(&path).map_err(|e| Self::io_error(locator, e))?;
            let updated = transform(&current).map_err(|e| edit_error(locator, e))?;
            if updated == current {
                debug!("event=document_unchanged module=storage locator={locator}");
                return Ok(());
            }

            let tmp = temp_path(&path);
            fs::write(&tmp, updated.as_bytes()).map_err(|e| Self::io_error(locator, e))?;
            if let Err(err) = fs::rename(&tmp, &path) {
                let _ = fs::remove_file(&tmp);
                return Err(Self::io_error(locator, err));
            }
            info!(
                "event=document_written module=storage locator={} bytes={}",
                locator,
                updated.len()
            );
            Ok(())
        }
    }

    /* -------------------------------- Memory -------------------------------- */

    /// In-process store, handy for embedding and tests.
    #[derive(Debug, Default)]
    pub struct MemoryDocumentStore {
        docs: Mutex<BTreeMap<Locator, String>>,
    }

    impl MemoryDocumentStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, locator: Locator, text: impl Into<String>) {
            if let Ok(mut docs) = self.docs.lock() {
                docs.insert(locator, text.into());
            }
        }

        pub fn get(&self, locator: &Locator) -> Option<String> {
            self.docs.lock().ok()?.get(locator).cloned()
        }
    }

    impl DocumentStore for MemoryDocumentStore {
        fn exists(&self, locator: &Locator) -> bool {
            self.get(locator).is_some()
        }

        fn read(&self, locator: &Locator) -> Result<String, StoreError> {
            let docs = self.docs.lock().map_err(|_| StoreError::Poisoned)?;
            docs.get(locator)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(locator.clone()))
        }

        fn write_atomic(&self, locator: &Locator, transform: &Transform<'_>) -> Result<(), StoreError> {
            let mut docs = self.docs.lock().map_err(|_| StoreError::Poisoned)?;
            let current = docs
                .get_mut(locator)
                .ok_or_else(|| StoreError::NotFound(locator.clone()))?;
            let updated = transform(current.as_str()).map_err(|e| edit_error(locator, e))?;
            *current = updated;
            Ok(())
        }
    }

}

pub mod service {
    //! Dashboard façade: resolves dates to notes, reads records, and routes each
    //! edit to the metadata accessor or a section rewrite.

    use crate::config::Settings;
    use crate::core::{DayRecord, DomainError, Field, Locator, MetaValue, NoteKind, PeriodGoal, ViewMode};
    use crate::dates::{date_range_for, enumerate_dates};
    use crate::format::replace_section;
    use crate::mapper::{EntryMapper, RawEdit};
    use crate::storage::{DocumentStore, StoreError};
    use chrono::NaiveDate;
    use log::{debug, info};

    #[derive(Debug, thiserror::Error)]
    pub enum DashboardError {
        #[error(transparent)]
        Store(#[from] StoreError),
        #[error(transparent)]
        Domain(#[from] DomainError),
    }

    impl DashboardError {
        pub fn is_not_found(&self) -> bool {
            matches!(self, DashboardError::Store(e) if e.is_not_found())
        }
    }

    pub struct Dashboard<S> {
        store: S,
        settings: Settings,
        mapper: EntryMapper,
    }

    impl<S: DocumentStore> Dashboard<S> {
        pub fn new(store: S, settings: Settings) -> Self {
            let mapper = EntryMapper::new(settings.fields.clone());
            Self {
                store,
                settings,
                mapper,
            }
        }

        pub fn store(&self) -> &S {
            &self.store
        }

        pub fn settings(&self) -> &Settings {
            &self.settings
        }

        pub fn mapper(&self) -> &EntryMapper {
            &self.mapper
        }

        pub fn locator_for(&self, kind: NoteKind, date: NaiveDate) -> Locator {
            self.settings.layout.locator_for(kind, date)
        }

        pub fn date_range(&self, mode: ViewMode, reference: NaiveDate) -> (NaiveDate, NaiveDate) {
            date_range_for(mode, reference, self.settings.recent_days)
        }

        /// Reads one daily note; a missing note is an error here.
        pub fn load_day(&self, date: NaiveDate) -> Result<DayRecord, DashboardError> {
            let locator = self.locator_for(NoteKind::Daily, date);
            let text = self.store.read(&locator)?;
            Ok(self.mapper.read_day(date, locator, &text))
        }

        /// Records for every day of the window that has a note, oldest first.
        pub fn load_range(
            &self,
            mode: ViewMode,
            reference: NaiveDate,
        ) -> Result<Vec<DayRecord>, DashboardError> {
            let (start, end) = self.date_range(mode, reference);
            let mut records = Vec::new();
            for date in enumerate_dates(start, end) {
                match self.load_day(date) {
                    Ok(record) => records.push(record),
                    Err(err) if err.is_not_found() => {
                        debug!("event=day_skipped module=service date={date} reason=missing")
                    }
                    Err(err) => return Err(err),
                }
            }
            Ok(records)
        }

        /// Goal of the weekly/monthly note covering `reference`, if that note exists.
        pub fn load_goal(
            &self,
            kind: NoteKind,
            reference: NaiveDate,
        ) -> Result<Option<PeriodGoal>, DashboardError> {
            let locator = self.locator_for(kind, reference);
            let text = match self.store.read(&locator) {
                Ok(text) => text,
                Err(err) if err.is_not_found() => return Ok(None),
                Err(err) => return Err(err.into()),
            };
            let label = self.settings.layout.file_stem(kind, reference);
            Ok(Some(self.mapper.read_goal(label, locator, &text)))
        }

        /// Writes one field of the `kind` note covering `date`.
        pub fn update_field(
            &self,
            kind: NoteKind,
            date: NaiveDate,
            field: Field,
            value: &MetaValue,
        ) -> Result<(), DashboardError> {
            let locator = self.locator_for(kind, date);
            match self.mapper.encode_edit(field, kind, value)? {
                RawEdit::Metadata { key, value } => {
                    self.store.metadata_patch(&locator, &key, value.as_ref())?
                }
                RawEdit::Section { header, body } => self
                    .store
                    .write_atomic(&locator, &|doc| replace_section(doc, &header, &body))?,
            }
            info!("event=field_updated module=service locator={locator} field={field}");
            Ok(())
        }

        pub fn update_day(
            &self,
            date: NaiveDate,
            field: Field,
            value: &MetaValue,
        ) -> Result<(), DashboardError> {
            self.update_field(NoteKind::Daily, date, field, value)
        }

        pub fn update_goal(
            &self,
            kind: NoteKind,
            reference: NaiveDate,
            content: &str,
        ) -> Result<(), DashboardError> {
            self.update_field(kind, reference, Field::Goal, &MetaValue::from(content))
        }
    }

}

pub mod projectors {
    pub mod chart_projector {
        use crate::core::DayRecord;
        use chrono::NaiveDate;
        use serde::Serialize;

        pub const SLEEP_TARGET_MINUTES: u32 = 7 * 60;
        pub const SCREEN_TIME_TARGET_MINUTES: u32 = 4 * 60;
        const DEFAULT_Y_MAX: u32 = 12;

        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct ChartPoint {
            pub date: NaiveDate,
            pub sleep_hours: Option<f64>,
            pub screen_hours: Option<f64>,
        }

        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct ChartSeries {
            pub points: Vec<ChartPoint>,
            /// `ceil(max value) + 1`, or 12 when there is nothing to plot.
            pub y_max: u32,
            pub sleep_target_hours: f64,
            pub screen_target_hours: f64,
        }

        fn hours(minutes: u32) -> f64 {
            (f64::from(minutes) / 6.0).round() / 10.0
        }

        /// Sleep and screen time per day, oldest first.
        pub fn project(records: &[DayRecord]) -> ChartSeries {
            let mut sorted: Vec<&DayRecord> = records.iter().collect();
            sorted.sort_by_key(|r| r.date);

            let points: Vec<ChartPoint> = sorted
                .into_iter()
                .map(|r| ChartPoint {
                    date: r.date,
                    sleep_hours: r.sleep_minutes().map(hours),
                    screen_hours: r.screen_time.map(|t| hours(t.minutes_since_midnight())),
                })
                .collect();

            let max = points
                .iter()
                .flat_map(|p| [p.sleep_hours, p.screen_hours])
                .flatten()
                .filter(|v| *v > 0.0)
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))));

            ChartSeries {
                points,
                y_max: max.map_or(DEFAULT_Y_MAX, |m| m.ceil() as u32 + 1),
                sleep_target_hours: hours(SLEEP_TARGET_MINUTES),
                screen_target_hours: hours(SCREEN_TIME_TARGET_MINUTES),
            }
        }

    }

    pub mod table_projector {
        use crate::core::DayRecord;
        use crate::dates::{format_date_label, format_minutes_hm};
        use serde::Serialize;

        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct TableRow {
            pub label: String,
            /// Only shown for a positive duration.
            pub sleep: Option<String>,
            #[serde(flatten)]
            pub record: DayRecord,
        }

        /// Table rows, newest day first.
        pub fn project(records: &[DayRecord], weekday_labels: &[String]) -> Vec<TableRow> {
            let mut rows: Vec<TableRow> = records
                .iter()
                .map(|r| TableRow {
                    label: format_date_label(r.date, weekday_labels),
                    sleep: r.sleep_minutes().filter(|m| *m > 0).map(format_minutes_hm),
                    record: r.clone(),
                })
                .collect();
            rows.sort_by(|a, b| b.record.date.cmp(&a.record.date));
            rows
        }

    }
}

pub mod logging {
    //! Logger bootstrap for the CLI. Library code only talks to the `log`
    //! facade, so embedders can install whatever backend they use.

    use flexi_logger::{FlexiLoggerError, Logger, LoggerHandle};

    /// `debug` when verbose, `warn` otherwise.
    pub fn default_log_level(verbose: bool) -> &'static str {
        if verbose { "debug" } else { "warn" }
    }

    /// Starts logging to stderr. Without `verbose`, a `RUST_LOG` setting wins over
    /// the default level.
    pub fn init_logging(verbose: bool) -> Result<LoggerHandle, FlexiLoggerError> {
        let level = default_log_level(verbose);
        let logger = if verbose {
            Logger::try_with_str(level)?
        } else {
            Logger::try_with_env_or_str(level)?
        };
        logger
            .log_to_stderr()
            .format(flexi_logger::default_format)
            .start()
    }
}

pub use config::Settings;
pub use format::{replace_section, write_metadata_key};
pub use mapper::EntryMapper;
pub use parser::{SectionParser, parse_document, parse_metadata};
pub use service::Dashboard;
pub use storage::{DocumentStore, FsDocumentStore, MemoryDocumentStore};
