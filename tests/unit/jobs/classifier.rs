//! Unit tests for the output classifier

use botrix::jobs::classifier::{
    find_balanced_object, parse_backtest_summary, OutputClassifier, OutputEvent, StreamOrigin,
};
use botrix::models::LogSeverity;

fn log_messages(events: &[OutputEvent]) -> Vec<(LogSeverity, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            OutputEvent::Log(entry) => Some((entry.severity, entry.message.clone())),
            _ => None,
        })
        .collect()
}

#[test]
fn stdout_lines_are_classified_info() {
    let mut classifier = OutputClassifier::new();
    let events = classifier.push_chunk(StreamOrigin::Stdout, b"Starting backtest...\n");
    let logs = log_messages(&events);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0], (LogSeverity::Info, "Starting backtest...".to_string()));
}

#[test]
fn stderr_lines_are_always_errors() {
    let mut classifier = OutputClassifier::new();
    let events = classifier.push_chunk(StreamOrigin::Stderr, b"something broke\n");
    let logs = log_messages(&events);
    assert_eq!(logs[0].0, LogSeverity::Error);
}

#[test]
fn stdout_traceback_is_an_error() {
    let mut classifier = OutputClassifier::new();
    let events =
        classifier.push_chunk(StreamOrigin::Stdout, b"Traceback (most recent call last):\n");
    assert_eq!(log_messages(&events)[0].0, LogSeverity::Error);
}

#[test]
fn partial_lines_are_carried_across_chunks() {
    let mut classifier = OutputClassifier::new();
    let events = classifier.push_chunk(StreamOrigin::Stdout, b"hello ");
    assert!(log_messages(&events).is_empty());
    let events = classifier.push_chunk(StreamOrigin::Stdout, b"world\n");
    assert_eq!(log_messages(&events)[0].1, "hello world");
}

#[test]
fn trailing_partial_line_is_flushed() {
    let mut classifier = OutputClassifier::new();
    classifier.push_chunk(StreamOrigin::Stdout, b"no newline at end");
    let events = classifier.flush();
    assert_eq!(log_messages(&events)[0].1, "no newline at end");
}

#[test]
fn marker_delimited_payload_split_across_chunks() {
    // Chunk boundaries fall inside the marker lines themselves
    let chunks: [&[u8]; 3] = [
        b"==== BACKTEST_RES",
        b"ULT_START ====\n{\"a\":1}\n==== BACKTEST_RESU",
        b"LT_END ====\n",
    ];
    let mut classifier = OutputClassifier::new();
    for chunk in chunks {
        classifier.push_chunk(StreamOrigin::Stdout, chunk);
    }
    assert_eq!(classifier.take_payload().as_deref(), Some("{\"a\":1}"));
}

#[test]
fn payload_split_mid_json_is_reconstructed() {
    let payload = "{\"initialBalance\":10000.0,\"finalBalance\":13157.56,\"netProfit\":3157.56,\
                   \"winRate\":76.18,\"maxDrawdown\":-3.75,\"totalTrades\":1956,\
                   \"winningTrades\":1490,\"losingTrades\":463}";
    let text = format!("some log line\n{}\nmore output\n", payload);
    let bytes = text.as_bytes();

    // Split at three arbitrary byte boundaries, one inside the JSON
    for split in [(10, 40), (15, 60), (20, 95)] {
        let mut classifier = OutputClassifier::new();
        classifier.push_chunk(StreamOrigin::Stdout, &bytes[..split.0]);
        classifier.push_chunk(StreamOrigin::Stdout, &bytes[split.0..split.1]);
        classifier.push_chunk(StreamOrigin::Stdout, &bytes[split.1..]);
        assert_eq!(classifier.take_payload().as_deref(), Some(payload));
    }
}

#[test]
fn multibyte_characters_split_across_chunks_survive_intact() {
    let payload = "{\"note\":\"résultat €\",\"a\":1}";
    let bytes = payload.as_bytes();
    // Split inside the two-byte encoding of 'é'
    let split = bytes.iter().position(|&b| b == 0xc3).expect("multibyte") + 1;

    let mut classifier = OutputClassifier::new();
    classifier.push_chunk(StreamOrigin::Stdout, &bytes[..split]);
    let mut rest = bytes[split..].to_vec();
    rest.push(b'\n');
    classifier.push_chunk(StreamOrigin::Stdout, &rest);

    assert_eq!(classifier.take_payload().as_deref(), Some(payload));
}

#[test]
fn only_first_payload_is_kept() {
    let mut classifier = OutputClassifier::new();
    let events = classifier.push_chunk(StreamOrigin::Stdout, b"{\"a\":1}\n{\"b\":2}\n");
    assert_eq!(classifier.take_payload().as_deref(), Some("{\"a\":1}"));
    let warned = log_messages(&events)
        .iter()
        .any(|(sev, msg)| *sev == LogSeverity::Warning && msg.contains("ignoring"));
    assert!(warned, "expected a warning for the second payload");
}

#[test]
fn payload_lines_still_appear_in_logs() {
    let mut classifier = OutputClassifier::new();
    let events = classifier.push_chunk(StreamOrigin::Stdout, b"{\"a\":1}\n");
    assert_eq!(log_messages(&events)[0].1, "{\"a\":1}");
    assert!(classifier.take_payload().is_some());
}

#[test]
fn braces_inside_strings_do_not_unbalance_the_scan() {
    let text = "{\"note\":\"weird } brace { inside\",\"x\":1}";
    let (start, end) = find_balanced_object(text).expect("object found");
    assert_eq!(&text[start..end], text);
}

#[test]
fn nested_objects_match_the_outermost() {
    let text = "prefix {\"outer\":{\"inner\":2}} suffix";
    let (start, end) = find_balanced_object(text).expect("object found");
    assert_eq!(&text[start..end], "{\"outer\":{\"inner\":2}}");
}

#[test]
fn incomplete_object_is_not_matched() {
    assert!(find_balanced_object("{\"a\":1").is_none());
    assert!(find_balanced_object("no braces here").is_none());
}

#[test]
fn summary_parses_with_all_fields() {
    let payload = "{\"initialBalance\":10000.0,\"finalBalance\":13157.56,\
                   \"netProfit\":3157.56,\"winRate\":76.18,\"maxDrawdown\":-3.75,\
                   \"totalTrades\":1956,\"winningTrades\":1490,\"losingTrades\":463}";
    let summary = parse_backtest_summary(payload).expect("parses");
    assert_eq!(summary.net_profit, 3157.56);
    assert_eq!(summary.total_trades, 1956);
    assert_eq!(summary.max_drawdown, -3.75);
}

#[test]
fn control_characters_are_stripped_before_parse() {
    let payload = "{\"initialBalance\":1.0,\n\"finalBalance\":2.0,\t\"netProfit\":1.0,\
                   \"winRate\":50.0,\"maxDrawdown\":-1.0,\"totalTrades\":2,\
                   \"winningTrades\":1,\"losingTrades\":1}";
    assert!(parse_backtest_summary(payload).is_ok());
}

#[test]
fn malformed_payload_is_an_error_not_a_panic() {
    assert!(parse_backtest_summary("{\"a\":1}").is_err());
    assert!(parse_backtest_summary("not json at all").is_err());
}
