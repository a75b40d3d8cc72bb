use std::{fmt::Write, io::Cursor};

use html_escape::encode_text;
use image::{ImageError, ImageFormat, Rgb, RgbImage};

use super::Poll;

/// Chart width in pixels.
const CHART_WIDTH: u32 = 640;
const MARGIN: u32 = 24;
const BAR_HEIGHT: u32 = 40;
const BAR_GAP: u32 = 16;
/// Bars past this many are only listed in the caption.
const MAX_BARS: usize = 12;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const TRACK: Rgb<u8> = Rgb([230, 230, 230]);

/// Bar colors, each with the square emoji that marks it in the caption.
const PALETTE: [(Rgb<u8>, &str); 8] = [
    (Rgb([33, 150, 243]), "🟦"),
    (Rgb([244, 67, 54]), "🟥"),
    (Rgb([76, 175, 80]), "🟩"),
    (Rgb([255, 193, 7]), "🟨"),
    (Rgb([156, 39, 176]), "🟪"),
    (Rgb([255, 152, 0]), "🟧"),
    (Rgb([121, 85, 72]), "🟫"),
    (Rgb([33, 33, 33]), "⬛"),
];

/// Rendered results of a poll: a chart if anyone answered, and the caption
/// that explains it.
#[derive(Debug, Clone)]
pub struct PollResults {
    /// PNG image of a horizontal bar chart.
    pub chart: Option<Vec<u8>>,
    /// HTML caption, made for whoever asked.
    pub caption: String,
}

/// Answers and how many people gave each, most popular first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    pub rows: Vec<(String, usize)>,
    pub total: usize,
}

pub fn tally(poll: &Poll) -> Tally {
    // Fixed options show up even when nobody picked them.
    let mut rows: Vec<(String, usize)> = poll
        .answers
        .options()
        .iter()
        .map(|option| (option.clone(), 0))
        .collect();

    for answer in poll.data.values() {
        match rows.iter_mut().find(|(option, _)| option == answer) {
            Some((_, count)) => *count += 1,
            None => rows.push((answer.clone(), 1)),
        }
    }

    rows.sort_by(|(a_name, a_count), (b_name, b_count)| {
        b_count.cmp(a_count).then_with(|| a_name.cmp(b_name))
    });

    Tally {
        rows,
        total: poll.data.len(),
    }
}

/// Horizontal bar chart of the tally as a PNG image. Bars are in tally
/// order and colored by [`PALETTE`], longest bar spanning the full width.
pub fn render_chart(tally: &Tally) -> Result<Vec<u8>, ImageError> {
    let rows = &tally.rows[..tally.rows.len().min(MAX_BARS)];
    let bars = rows.len().max(1) as u32;
    let height = MARGIN * 2 + bars * BAR_HEIGHT + (bars - 1) * BAR_GAP;
    let track_width = CHART_WIDTH - MARGIN * 2;
    let max_count = rows.iter().map(|(_, count)| *count).max().unwrap_or(0);

    let bar_lengths: Vec<u32> = rows
        .iter()
        .map(|(_, count)| {
            if max_count == 0 {
                0
            } else {
                // Round up so a single vote is still visible.
                (*count as u32 * track_width).div_ceil(max_count as u32)
            }
        })
        .collect();

    let image = RgbImage::from_fn(CHART_WIDTH, height, |x, y| {
        if x < MARGIN || x >= CHART_WIDTH - MARGIN || y < MARGIN {
            return BACKGROUND;
        }
        let row = (y - MARGIN) / (BAR_HEIGHT + BAR_GAP);
        let in_bar = (y - MARGIN) % (BAR_HEIGHT + BAR_GAP) < BAR_HEIGHT;
        match bar_lengths.get(row as usize) {
            Some(length) if in_bar && x - MARGIN < *length => palette(row as usize).0,
            Some(_) if in_bar => TRACK,
            _ => BACKGROUND,
        }
    });

    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

fn palette(index: usize) -> (Rgb<u8>, &'static str) {
    PALETTE[index % PALETTE.len()]
}

/// Results of the poll as a chart and an HTML caption made for `requester`.
///
/// `member_count` is how many people are in the chat, if known.
pub fn render_results(
    poll: &Poll,
    requester: &str,
    member_count: Option<u32>,
) -> Result<PollResults, ImageError> {
    let tally = tally(poll);

    let chart = if tally.total == 0 {
        None
    } else {
        Some(render_chart(&tally)?)
    };

    Ok(PollResults {
        chart,
        caption: caption(poll, &tally, requester, member_count),
    })
}

fn caption(poll: &Poll, tally: &Tally, requester: &str, member_count: Option<u32>) -> String {
    let mut caption = format!("<b>{}</b>\n\n", encode_text(&poll.topic));

    if tally.total == 0 {
        caption.push_str("Nobody answered yet.\n");
    } else {
        for (index, (name, count)) in tally.rows.iter().take(MAX_BARS).enumerate() {
            writeln!(caption, "{} {}: {}", palette(index).1, encode_text(name), count)
                .expect("Writing to a String never fails");
        }
        if tally.rows.len() > MAX_BARS {
            writeln!(caption, "...and {} more", tally.rows.len() - MAX_BARS)
                .expect("Writing to a String never fails");
        }
    }
    caption.push('\n');

    match poll.answer_of(requester) {
        Some(answer) => writeln!(caption, "Your answer: {}", encode_text(answer)),
        None => writeln!(caption, "You did not participate"),
    }
    .expect("Writing to a String never fails");

    write!(caption, "Total answers: {}", tally.total).expect("Writing to a String never fails");

    if let Some(members) = member_count.filter(|members| *members > 0) {
        let percentage = tally.total as f64 * 100.0 / f64::from(members);
        write!(
            caption,
            "\nParticipation: {:.1}% of {} members",
            percentage, members
        )
        .expect("Writing to a String never fails");
    }

    caption
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::{
        machine::{advance, begin_answer},
        parse_end, Answers,
    };

    fn best_feature_poll() -> Poll {
        Poll::new(
            String::from("Best feature?"),
            Answers::parse("speed, privacy, community").unwrap(),
            parse_end("2099-01-01 00:00:00"),
        )
    }

    #[test]
    fn counts_and_order() {
        let mut poll = best_feature_poll();
        poll.record("@a", String::from("privacy"));
        poll.record("@b", String::from("speed"));
        poll.record("@c", String::from("privacy"));

        let tally = tally(&poll);
        assert_eq!(tally.total, 3);
        assert_eq!(
            tally.rows,
            vec![
                (String::from("privacy"), 2),
                (String::from("speed"), 1),
                (String::from("community"), 0),
            ]
        );
    }

    #[test]
    fn free_form_rows_come_from_answers() {
        let mut poll = Poll::new(String::from("Q"), Answers::FreeForm, None);
        poll.record("@a", String::from("yes"));
        poll.record("@b", String::from("maybe"));
        poll.record("@c", String::from("yes"));

        assert_eq!(
            tally(&poll).rows,
            vec![(String::from("yes"), 2), (String::from("maybe"), 1)]
        );
    }

    #[test]
    fn chart_bars_scale() {
        let png = render_chart(&Tally {
            rows: vec![(String::from("a"), 4), (String::from("bb"), 1), (String::from("c"), 0)],
            total: 5,
        })
        .unwrap();
        let chart = image::load_from_memory(&png).unwrap().to_rgb8();

        assert_eq!(chart.width(), CHART_WIDTH);
        assert_eq!(chart.height(), MARGIN * 2 + 3 * BAR_HEIGHT + 2 * BAR_GAP);

        let row_y = |row: u32| MARGIN + row * (BAR_HEIGHT + BAR_GAP) + BAR_HEIGHT / 2;
        let last_x = CHART_WIDTH - MARGIN - 1;
        // Leading answer fills the whole track.
        assert_eq!(*chart.get_pixel(last_x, row_y(0)), PALETTE[0].0);
        // A quarter of it, rounded up.
        let quarter = (CHART_WIDTH - MARGIN * 2).div_ceil(4);
        assert_eq!(*chart.get_pixel(MARGIN + quarter - 1, row_y(1)), PALETTE[1].0);
        assert_eq!(*chart.get_pixel(MARGIN + quarter, row_y(1)), TRACK);
        // Nobody picked this one.
        assert_eq!(*chart.get_pixel(MARGIN, row_y(2)), TRACK);
        assert_eq!(*chart.get_pixel(0, 0), BACKGROUND);
    }

    #[test]
    fn caption_legend_matches_bar_colors() {
        let mut poll = best_feature_poll();
        poll.record("@a", String::from("privacy"));
        poll.record("@b", String::from("privacy"));
        poll.record("@c", String::from("speed"));

        let results = render_results(&poll, "@a", None).unwrap();
        assert!(results.chart.is_some());
        assert!(results.caption.starts_with("<b>Best feature?</b>"));
        assert!(results.caption.contains("🟦 privacy: 2\n🟥 speed: 1\n🟩 community: 0"));
    }

    #[test]
    fn long_free_form_results_are_cut() {
        let mut poll = Poll::new(String::from("Q"), Answers::FreeForm, None);
        for i in 0..MAX_BARS + 3 {
            poll.record(&format!("@user{i}"), format!("answer {i}"));
        }

        let results = render_results(&poll, "@user0", None).unwrap();
        assert!(results.caption.contains("...and 3 more"));

        let chart = image::load_from_memory(&results.chart.unwrap()).unwrap();
        let bars = MAX_BARS as u32;
        assert_eq!(chart.height(), MARGIN * 2 + bars * BAR_HEIGHT + (bars - 1) * BAR_GAP);
    }

    #[test]
    fn two_respondents_scenario() {
        let now = parse_end("2098-01-01 00:00:00").unwrap();
        let mut poll = best_feature_poll();

        for (respondent, answer) in [("@ann", "privacy"), ("@bob", "speed")] {
            let step = begin_answer(&poll, now);
            let step = advance(step.next, answer, &poll, respondent, now);
            step.effect.apply(&mut poll);
        }

        assert_eq!(tally(&poll).total, 2);

        let for_ann = render_results(&poll, "@ann", Some(10)).unwrap().caption;
        assert!(for_ann.contains("Your answer: privacy"));
        assert!(for_ann.contains("Total answers: 2"));
        assert!(for_ann.contains("Participation: 20.0% of 10 members"));

        let for_bob = render_results(&poll, "@bob", Some(10)).unwrap().caption;
        assert!(for_bob.contains("Your answer: speed"));

        let for_carl = render_results(&poll, "@carl", None).unwrap().caption;
        assert!(for_carl.contains("You did not participate"));
        assert!(!for_carl.contains("Participation"));
    }

    #[test]
    fn empty_results() {
        let results = render_results(&best_feature_poll(), "@ann", Some(0)).unwrap();
        assert!(results.chart.is_none());
        let text = results.caption;
        assert!(text.contains("Nobody answered yet."));
        assert!(text.contains("Total answers: 0"));
        assert!(!text.contains("Participation"));
    }
}
