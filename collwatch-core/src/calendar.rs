//! Calendar payload parsing and per-entry event deltas.
//!
//! [`IcsParser`] reads the iCalendar line format far enough to pull out the
//! primary event of a payload: content lines are unfolded, split into name,
//! parameters and value, and nested into components by BEGIN/END. Field-level
//! semantics beyond that are left to whoever compares the events.

use crate::error::{Error, Result};
use crate::models::{ChangeEntry, ChangeKind, ContentId};
use crate::session::ContentLoader;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

const CALENDAR_COMPONENT: &str = "VCALENDAR";
const EVENT_COMPONENT: &str = "VEVENT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Property {
    pub name: String,
    pub params: Vec<(String, String)>,
    pub value: String,
}

impl Property {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The value with TEXT escapes resolved.
    pub fn text(&self) -> String {
        unescape_text(&self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Component {
    pub name: String,
    pub properties: Vec<Property>,
    pub components: Vec<Component>,
}

impl Component {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            ..Self::default()
        }
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn properties_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Property> {
        self.properties
            .iter()
            .filter(move |p| p.name.eq_ignore_ascii_case(name))
    }
}

/// A parsed VCALENDAR object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Calendar {
    pub properties: Vec<Property>,
    pub components: Vec<Component>,
}

impl Calendar {
    pub fn events(&self) -> impl Iterator<Item = &Component> {
        self.components
            .iter()
            .filter(|c| c.name == EVENT_COMPONENT)
    }

    /// The master event: the first VEVENT without a RECURRENCE-ID, otherwise
    /// the first VEVENT at all.
    pub fn primary_event(&self) -> Option<StructuredEvent> {
        self.events()
            .find(|c| c.property("RECURRENCE-ID").is_none())
            .or_else(|| self.events().next())
            .map(StructuredEvent::from_component)
    }
}

/// A DTSTART/DTEND/RECURRENCE-ID value as written, plus its zone parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventTime {
    pub value: String,
    pub tzid: Option<String>,
    pub date_only: bool,
}

impl EventTime {
    fn from_property(property: &Property) -> Self {
        let date_only = property
            .param("VALUE")
            .map(|v| v.eq_ignore_ascii_case("DATE"))
            .unwrap_or(property.value.len() == 8);
        Self {
            value: property.value.clone(),
            tzid: property.param("TZID").map(str::to_string),
            date_only,
        }
    }

    pub fn is_utc(&self) -> bool {
        self.value.ends_with('Z')
    }

    /// Wall-clock time; midnight for date-only values.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        if self.date_only {
            NaiveDate::parse_from_str(&self.value, "%Y%m%d")
                .ok()?
                .and_hms_opt(0, 0, 0)
        } else {
            NaiveDateTime::parse_from_str(self.value.trim_end_matches('Z'), "%Y%m%dT%H%M%S").ok()
        }
    }

    /// Only UTC values map to an instant without zone data.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        if !self.is_utc() {
            return None;
        }
        self.to_naive().map(|naive| Utc.from_utc_datetime(&naive))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StructuredEvent {
    pub uid: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub status: Option<String>,
    pub sequence: u32,
    pub dtstart: Option<EventTime>,
    pub dtend: Option<EventTime>,
    pub recurrence_id: Option<EventTime>,
    pub rrule: Option<String>,
    pub organizer: Option<String>,
    pub attendees: Vec<String>,
    #[serde(skip_serializing)]
    pub properties: Vec<Property>,
}

impl StructuredEvent {
    pub fn from_component(component: &Component) -> Self {
        let text = |name: &str| component.property(name).map(Property::text);
        let raw = |name: &str| component.property(name).map(|p| p.value.clone());
        let time = |name: &str| component.property(name).map(EventTime::from_property);

        Self {
            uid: raw("UID"),
            summary: text("SUMMARY"),
            description: text("DESCRIPTION"),
            location: text("LOCATION"),
            status: raw("STATUS"),
            sequence: component
                .property("SEQUENCE")
                .and_then(|p| p.value.trim().parse().ok())
                .unwrap_or(0),
            dtstart: time("DTSTART"),
            dtend: time("DTEND"),
            recurrence_id: time("RECURRENCE-ID"),
            rrule: raw("RRULE"),
            organizer: raw("ORGANIZER"),
            attendees: component
                .properties_named("ATTENDEE")
                .map(|p| p.value.clone())
                .collect(),
            properties: component.properties.clone(),
        }
    }
}

/// Turns payload bytes into a [`Calendar`].
///
/// `Ok(None)` means the bytes are not calendar data at all. Calendar data
/// that cannot be read is an [`Error::CalendarParse`].
pub trait CalendarParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<Option<Calendar>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IcsParser;

impl CalendarParser for IcsParser {
    fn parse(&self, bytes: &[u8]) -> Result<Option<Calendar>> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        if !starts_calendar(bytes) {
            return Ok(None);
        }

        let text = std::str::from_utf8(bytes).map_err(|e| Error::CalendarParse {
            line: line_at(bytes, e.valid_up_to()),
            message: "invalid UTF-8".to_string(),
        })?;

        parse_calendar(text).map(Some)
    }
}

fn starts_calendar(bytes: &[u8]) -> bool {
    let first = bytes
        .split(|b| *b == b'\n')
        .find(|line| !line.iter().all(u8::is_ascii_whitespace))
        .unwrap_or_default();
    let first = first.strip_suffix(b"\r").unwrap_or(first);
    first.eq_ignore_ascii_case(b"BEGIN:VCALENDAR")
}

fn line_at(bytes: &[u8], offset: usize) -> usize {
    bytes[..offset].iter().filter(|b| **b == b'\n').count() + 1
}

/// Joins folded continuation lines, keeping the number of each logical
/// line's first physical line.
fn unfold(text: &str) -> Vec<(usize, String)> {
    let mut lines: Vec<(usize, String)> = Vec::new();
    for (index, raw) in text.split('\n').enumerate() {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(rest) = raw.strip_prefix(|c: char| c == ' ' || c == '\t') {
            if let Some((_, previous)) = lines.last_mut() {
                previous.push_str(rest);
                continue;
            }
        }
        if !raw.trim().is_empty() {
            lines.push((index + 1, raw.to_string()));
        }
    }
    lines
}

fn parse_calendar(text: &str) -> Result<Calendar> {
    let mut stack: Vec<Component> = Vec::new();
    let mut root: Option<Component> = None;

    for (line, content) in unfold(text) {
        let fail = |message: String| Error::CalendarParse { line, message };
        if root.is_some() {
            return Err(fail("content after END:VCALENDAR".to_string()));
        }

        let property = parse_content_line(&content).map_err(fail)?;
        if property.name == "BEGIN" {
            stack.push(Component::named(property.value.trim()));
        } else if property.name == "END" {
            let name = property.value.trim().to_ascii_uppercase();
            let component = stack
                .pop()
                .ok_or_else(|| fail(format!("END:{} without BEGIN", name)))?;
            if component.name != name {
                return Err(fail(format!("END:{} closes {}", name, component.name)));
            }
            match stack.last_mut() {
                Some(parent) => parent.components.push(component),
                None => root = Some(component),
            }
        } else {
            stack
                .last_mut()
                .ok_or_else(|| fail(format!("{} outside of a component", property.name)))?
                .properties
                .push(property);
        }
    }

    if let Some(open) = stack.last() {
        return Err(Error::CalendarParse {
            line: text.lines().count(),
            message: format!("unterminated {}", open.name),
        });
    }

    match root {
        Some(root) if root.name == CALENDAR_COMPONENT => Ok(Calendar {
            properties: root.properties,
            components: root.components,
        }),
        Some(root) => Err(Error::CalendarParse {
            line: 1,
            message: format!("top-level {} is not a calendar", root.name),
        }),
        None => Err(Error::CalendarParse {
            line: 1,
            message: "empty calendar".to_string(),
        }),
    }
}

/// Splits `NAME;PARAM=a,"b:c";X=y:value`. Colons and semicolons inside
/// quoted parameter values do not delimit.
fn parse_content_line(line: &str) -> std::result::Result<Property, String> {
    let mut in_quotes = false;
    let mut split = None;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                split = Some(i);
                break;
            }
            _ => {}
        }
    }
    let split = split.ok_or_else(|| format!("missing ':' in {:?}", line))?;
    let (head, value) = (&line[..split], &line[split + 1..]);

    let mut parts = split_unquoted(head, ';').into_iter();
    let name = parts.next().unwrap_or_default().trim().to_ascii_uppercase();
    if name.is_empty() {
        return Err("empty property name".to_string());
    }

    let mut params = Vec::new();
    for part in parts {
        let (key, val) = part
            .split_once('=')
            .ok_or_else(|| format!("malformed parameter {:?}", part))?;
        params.push((key.trim().to_ascii_uppercase(), val.trim_matches('"').to_string()));
    }

    Ok(Property {
        name,
        params,
        value: value.to_string(),
    })
}

fn split_unquoted(s: &str, delimiter: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == delimiter && !in_quotes {
            parts.push(&s[start..i]);
            start = i + 1;
        }
    }
    parts.push(&s[start..]);
    parts
}

fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// The event on each side of one change entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CalendarEventDelta {
    pub before: Option<StructuredEvent>,
    pub after: Option<StructuredEvent>,
}

impl CalendarEventDelta {
    pub fn is_empty(&self) -> bool {
        self.before.is_none() && self.after.is_none()
    }
}

pub struct CalendarEventDiffer<P: CalendarParser = IcsParser> {
    parser: P,
}

impl CalendarEventDiffer<IcsParser> {
    pub fn new() -> Self {
        Self { parser: IcsParser }
    }
}

impl Default for CalendarEventDiffer<IcsParser> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: CalendarParser> CalendarEventDiffer<P> {
    pub fn with_parser(parser: P) -> Self {
        Self { parser }
    }

    /// Parses the sides of `entry` its kind says exist.
    pub fn diff(
        &self,
        entry: &ChangeEntry,
        loader: &dyn ContentLoader,
    ) -> Result<CalendarEventDelta> {
        let (before, after) = match entry.kind {
            ChangeKind::Added => (None, self.event(entry.new_id.as_ref(), loader)?),
            ChangeKind::Deleted => (self.event(entry.old_id.as_ref(), loader)?, None),
            ChangeKind::Modified => (
                self.event(entry.old_id.as_ref(), loader)?,
                self.event(entry.new_id.as_ref(), loader)?,
            ),
        };
        Ok(CalendarEventDelta { before, after })
    }

    fn event(
        &self,
        id: Option<&ContentId>,
        loader: &dyn ContentLoader,
    ) -> Result<Option<StructuredEvent>> {
        let Some(id) = id else {
            return Ok(None);
        };
        let bytes = loader.load_blob(id)?;
        let event = self
            .parser
            .parse(&bytes)?
            .and_then(|calendar| calendar.primary_event());
        if event.is_none() {
            debug!("No event in {}", id.short());
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmark::DEFAULT_BOOKMARK;
    use crate::session::MemorizedDiffer;
    use crate::testing::{bookmark, head, snapshot, store, CALENDAR_A, CALENDAR_A_MOVED};

    fn parse(text: &str) -> Result<Option<Calendar>> {
        IcsParser.parse(text.as_bytes())
    }

    #[test]
    fn test_parse_primary_event() {
        let calendar = parse(CALENDAR_A).unwrap().unwrap();
        assert_eq!(calendar.properties.len(), 2);

        let event = calendar.primary_event().unwrap();
        assert_eq!(event.uid.as_deref(), Some("event-a@example.com"));
        assert_eq!(event.summary.as_deref(), Some("First event"));
        assert_eq!(event.sequence, 0);

        let start = event.dtstart.unwrap();
        assert!(start.is_utc());
        assert!(!start.date_only);
        assert_eq!(
            start.to_utc().unwrap().to_rfc3339(),
            "2024-01-05T09:00:00+00:00"
        );
    }

    #[test]
    fn test_folded_lines_params_and_escapes() {
        let text = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
UID:x\r\n\
SUMMARY:Lunch\\, then a\r\n \\nwalk\r\n\
DTSTART;TZID=Europe/Berlin:20240105T120000\r\n\
DTEND;VALUE=DATE:20240106\r\n\
ORGANIZER;CN=\"Doe; Jane\":mailto:jane@example.com\r\n\
ATTENDEE:mailto:a@example.com\r\n\
ATTENDEE:mailto:b@example.com\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let event = parse(text).unwrap().unwrap().primary_event().unwrap();
        assert_eq!(event.summary.as_deref(), Some("Lunch, then a\nwalk"));
        assert_eq!(event.organizer.as_deref(), Some("mailto:jane@example.com"));
        assert_eq!(event.attendees.len(), 2);

        let start = event.dtstart.unwrap();
        assert_eq!(start.tzid.as_deref(), Some("Europe/Berlin"));
        assert!(start.to_utc().is_none());
        assert_eq!(
            start.to_naive().unwrap().to_string(),
            "2024-01-05 12:00:00"
        );

        let end = event.dtend.unwrap();
        assert!(end.date_only);
        assert_eq!(end.to_naive().unwrap().to_string(), "2024-01-06 00:00:00");

        let organizer = event
            .properties
            .iter()
            .find(|p| p.name == "ORGANIZER")
            .unwrap();
        assert_eq!(organizer.param("cn"), Some("Doe; Jane"));
    }

    #[test]
    fn test_master_event_preferred_over_override() {
        let text = "BEGIN:VCALENDAR\n\
BEGIN:VEVENT\n\
UID:r\n\
RECURRENCE-ID:20240112T090000Z\n\
SUMMARY:Override\n\
END:VEVENT\n\
BEGIN:VEVENT\n\
UID:r\n\
RRULE:FREQ=WEEKLY\n\
SUMMARY:Master\n\
END:VEVENT\n\
END:VCALENDAR\n";

        let event = parse(text).unwrap().unwrap().primary_event().unwrap();
        assert_eq!(event.summary.as_deref(), Some("Master"));
        assert_eq!(event.rrule.as_deref(), Some("FREQ=WEEKLY"));
    }

    #[test]
    fn test_non_calendar_payload_is_absent() {
        assert_eq!(parse("{\"color\": \"#ff0000\"}").unwrap(), None);
        assert_eq!(IcsParser.parse(&[0xff, 0xfe, 0x00]).unwrap(), None);
        assert_eq!(parse("").unwrap(), None);
    }

    #[test]
    fn test_calendar_without_event() {
        let text = "BEGIN:VCALENDAR\r\nBEGIN:VTODO\r\nUID:t\r\nEND:VTODO\r\nEND:VCALENDAR\r\n";
        let calendar = parse(text).unwrap().unwrap();
        assert_eq!(calendar.components.len(), 1);
        assert!(calendar.primary_event().is_none());
    }

    #[test]
    fn test_malformed_calendar_is_error() {
        let unbalanced = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:x\nEND:VTODO\nEND:VCALENDAR\n";
        match parse(unbalanced) {
            Err(Error::CalendarParse { line, .. }) => assert_eq!(line, 4),
            other => panic!("expected parse error, got {:?}", other),
        }

        let unterminated = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:x\n";
        assert!(matches!(parse(unterminated), Err(Error::CalendarParse { .. })));

        let no_colon = "BEGIN:VCALENDAR\nGARBAGE\nEND:VCALENDAR\n";
        match parse(no_colon) {
            Err(Error::CalendarParse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }

        let mut bad_utf8 = b"BEGIN:VCALENDAR\nSUMMARY:".to_vec();
        bad_utf8.extend_from_slice(&[0xc3, 0x28]);
        match IcsParser.parse(&bad_utf8) {
            Err(Error::CalendarParse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_delta_per_change_kind() {
        let store = store();
        let base = snapshot(
            &store,
            &[("cal/A.ics", CALENDAR_A), ("cal/gone.ics", CALENDAR_A)],
        );
        bookmark(&store, DEFAULT_BOOKMARK, &base);
        head(
            &store,
            &[("cal/A.ics", CALENDAR_A_MOVED), ("cal/new.ics", CALENDAR_A)],
        );

        let session = MemorizedDiffer::new(store).diff().unwrap();
        let differ = CalendarEventDiffer::new();
        let deltas: Vec<_> = session
            .changes()
            .iter()
            .map(|entry| (entry.path().to_string(), differ.diff(entry, &session).unwrap()))
            .collect();
        assert_eq!(deltas.len(), 3);

        let (path, modified) = &deltas[0];
        assert_eq!(path, "cal/A.ics");
        assert_eq!(modified.before.as_ref().unwrap().sequence, 0);
        let after = modified.after.as_ref().unwrap();
        assert_eq!(after.sequence, 1);
        assert_eq!(after.summary.as_deref(), Some("First event (moved)"));

        let (path, deleted) = &deltas[1];
        assert_eq!(path, "cal/gone.ics");
        assert!(deleted.before.is_some());
        assert!(deleted.after.is_none());

        let (path, added) = &deltas[2];
        assert_eq!(path, "cal/new.ics");
        assert!(added.before.is_none());
        let expected = parse(CALENDAR_A).unwrap().unwrap().primary_event();
        assert_eq!(added.after, expected);
    }

    #[test]
    fn test_non_calendar_entries_yield_empty_delta() {
        let store = store();
        let base = snapshot(&store, &[("cal/.props", "{}")]);
        bookmark(&store, DEFAULT_BOOKMARK, &base);
        head(&store, &[("cal/.props", "{\"c\":1}"), ("cal/notes.txt", "hi")]);

        let session = MemorizedDiffer::new(store).diff().unwrap();
        let differ: CalendarEventDiffer = CalendarEventDiffer::default();
        for entry in session.changes() {
            assert!(differ.diff(entry, &session).unwrap().is_empty());
        }
    }

    #[test]
    fn test_malformed_entry_reports_error() {
        let store = store();
        let base = snapshot(&store, &[("cal/A.ics", CALENDAR_A)]);
        bookmark(&store, DEFAULT_BOOKMARK, &base);
        head(&store, &[("cal/A.ics", "BEGIN:VCALENDAR\nBEGIN:VEVENT\n")]);

        let session = MemorizedDiffer::new(store).diff().unwrap();
        let entry = &session.changes()[0];
        assert!(matches!(
            CalendarEventDiffer::new().diff(entry, &session),
            Err(Error::CalendarParse { .. })
        ));
    }

    #[test]
    fn test_delta_serializes_without_raw_properties() {
        let event = parse(CALENDAR_A).unwrap().unwrap().primary_event();
        let delta = CalendarEventDelta {
            before: None,
            after: event,
        };
        let json = serde_json::to_value(&delta).unwrap();
        assert!(json["before"].is_null());
        assert_eq!(json["after"]["uid"], "event-a@example.com");
        assert!(json["after"].get("properties").is_none());
    }
}
