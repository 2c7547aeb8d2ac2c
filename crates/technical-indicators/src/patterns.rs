use quant_core::Bar;
use serde::{Deserialize, Serialize};

/// Candlestick pattern taxonomy.
///
/// The full set of 63 recognized patterns. The in-process detectors cover the
/// classic single/double/triple-candle subset; the remaining identifiers exist
/// so detections imported from an external TA source round-trip losslessly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternKind {
    TwoCrows,
    ThreeBlackCrows,
    ThreeInside,
    ThreeLineStrike,
    ThreeOutside,
    ThreeStarsInSouth,
    ThreeWhiteSoldiers,
    AbandonedBaby,
    AdvanceBlock,
    BeltHold,
    Breakaway,
    ClosingMarubozu,
    ConcealingBabySwallow,
    Counterattack,
    DarkCloudCover,
    Doji,
    DojiStar,
    DragonflyDoji,
    Engulfing,
    EveningDojiStar,
    EveningStar,
    GapSideBySideWhite,
    GravestoneDoji,
    Hammer,
    HangingMan,
    Harami,
    HaramiCross,
    HighWave,
    Hikkake,
    HikkakeModified,
    HomingPigeon,
    IdenticalThreeCrows,
    InNeck,
    InvertedHammer,
    Kicking,
    KickingByLength,
    LadderBottom,
    LongLeggedDoji,
    LongLine,
    Marubozu,
    MatchingLow,
    MatHold,
    MorningDojiStar,
    MorningStar,
    OnNeck,
    Piercing,
    RickshawMan,
    RisingFallingThreeMethods,
    RisingWindow,
    FallingWindow,
    SeparatingLines,
    ShootingStar,
    ShortLine,
    SpinningTop,
    StalledPattern,
    StickSandwich,
    Takuri,
    TasukiGap,
    Thrusting,
    Tristar,
    UniqueThreeRiver,
    UpsideGapTwoCrows,
    UpDownGapThreeMethods,
}

/// Reliability tier from the static per-pattern table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Reliability {
    Low,
    Medium,
    High,
}

impl Reliability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reliability::Low => "LOW",
            Reliability::Medium => "MEDIUM",
            Reliability::High => "HIGH",
        }
    }
}

impl PatternKind {
    /// Static reliability table keyed by pattern identifier.
    pub fn reliability(&self) -> Reliability {
        use PatternKind::*;
        match self {
            // Strong multi-candle reversals and continuation structures
            ThreeWhiteSoldiers | ThreeBlackCrows | MorningStar | EveningStar
            | MorningDojiStar | EveningDojiStar | AbandonedBaby | Engulfing | Kicking
            | KickingByLength | ThreeLineStrike | IdenticalThreeCrows | MatHold
            | ConcealingBabySwallow | UpsideGapTwoCrows => Reliability::High,

            // Reversals that need confirmation
            Hammer | InvertedHammer | ShootingStar | HangingMan | Piercing
            | DarkCloudCover | Harami | HaramiCross | ThreeInside | ThreeOutside
            | TwoCrows | HomingPigeon | LadderBottom | MatchingLow | StickSandwich
            | UniqueThreeRiver | Breakaway | Counterattack | DojiStar | Tristar
            | ThreeStarsInSouth | Takuri | AdvanceBlock | StalledPattern
            | RisingFallingThreeMethods | SeparatingLines | TasukiGap
            | UpDownGapThreeMethods | Hikkake | HikkakeModified => Reliability::Medium,

            // Indecision and single-candle noise
            Doji | DragonflyDoji | GravestoneDoji | LongLeggedDoji | RickshawMan
            | SpinningTop | HighWave | LongLine | ShortLine | Marubozu
            | ClosingMarubozu | BeltHold | InNeck | OnNeck | Thrusting
            | GapSideBySideWhite | RisingWindow | FallingWindow => Reliability::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        use PatternKind::*;
        match self {
            TwoCrows => "two_crows",
            ThreeBlackCrows => "three_black_crows",
            ThreeInside => "three_inside",
            ThreeLineStrike => "three_line_strike",
            ThreeOutside => "three_outside",
            ThreeStarsInSouth => "three_stars_in_south",
            ThreeWhiteSoldiers => "three_white_soldiers",
            AbandonedBaby => "abandoned_baby",
            AdvanceBlock => "advance_block",
            BeltHold => "belt_hold",
            Breakaway => "breakaway",
            ClosingMarubozu => "closing_marubozu",
            ConcealingBabySwallow => "concealing_baby_swallow",
            Counterattack => "counterattack",
            DarkCloudCover => "dark_cloud_cover",
            Doji => "doji",
            DojiStar => "doji_star",
            DragonflyDoji => "dragonfly_doji",
            Engulfing => "engulfing",
            EveningDojiStar => "evening_doji_star",
            EveningStar => "evening_star",
            GapSideBySideWhite => "gap_side_by_side_white",
            GravestoneDoji => "gravestone_doji",
            Hammer => "hammer",
            HangingMan => "hanging_man",
            Harami => "harami",
            HaramiCross => "harami_cross",
            HighWave => "high_wave",
            Hikkake => "hikkake",
            HikkakeModified => "hikkake_modified",
            HomingPigeon => "homing_pigeon",
            IdenticalThreeCrows => "identical_three_crows",
            InNeck => "in_neck",
            InvertedHammer => "inverted_hammer",
            Kicking => "kicking",
            KickingByLength => "kicking_by_length",
            LadderBottom => "ladder_bottom",
            LongLeggedDoji => "long_legged_doji",
            LongLine => "long_line",
            Marubozu => "marubozu",
            MatchingLow => "matching_low",
            MatHold => "mat_hold",
            MorningDojiStar => "morning_doji_star",
            MorningStar => "morning_star",
            OnNeck => "on_neck",
            Piercing => "piercing",
            RickshawMan => "rickshaw_man",
            RisingFallingThreeMethods => "rising_falling_three_methods",
            RisingWindow => "rising_window",
            FallingWindow => "falling_window",
            SeparatingLines => "separating_lines",
            ShootingStar => "shooting_star",
            ShortLine => "short_line",
            SpinningTop => "spinning_top",
            StalledPattern => "stalled_pattern",
            StickSandwich => "stick_sandwich",
            Takuri => "takuri",
            TasukiGap => "tasuki_gap",
            Thrusting => "thrusting",
            Tristar => "tristar",
            UniqueThreeRiver => "unique_three_river",
            UpsideGapTwoCrows => "upside_gap_two_crows",
            UpDownGapThreeMethods => "up_down_gap_three_methods",
        }
    }

    /// All 63 pattern identifiers, in declaration order.
    pub fn all() -> &'static [PatternKind] {
        use PatternKind::*;
        &[
            TwoCrows, ThreeBlackCrows, ThreeInside, ThreeLineStrike, ThreeOutside,
            ThreeStarsInSouth, ThreeWhiteSoldiers, AbandonedBaby, AdvanceBlock, BeltHold,
            Breakaway, ClosingMarubozu, ConcealingBabySwallow, Counterattack, DarkCloudCover,
            Doji, DojiStar, DragonflyDoji, Engulfing, EveningDojiStar, EveningStar,
            GapSideBySideWhite, GravestoneDoji, Hammer, HangingMan, Harami, HaramiCross,
            HighWave, Hikkake, HikkakeModified, HomingPigeon, IdenticalThreeCrows, InNeck,
            InvertedHammer, Kicking, KickingByLength, LadderBottom, LongLeggedDoji, LongLine,
            Marubozu, MatchingLow, MatHold, MorningDojiStar, MorningStar, OnNeck, Piercing,
            RickshawMan, RisingFallingThreeMethods, RisingWindow, FallingWindow,
            SeparatingLines, ShootingStar, ShortLine, SpinningTop, StalledPattern,
            StickSandwich, Takuri, TasukiGap, Thrusting, Tristar, UniqueThreeRiver,
            UpsideGapTwoCrows, UpDownGapThreeMethods,
        ]
    }
}

/// A pattern firing on one bar: +100 bullish, −100 bearish, 0 absent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternDetection {
    pub kind: PatternKind,
    pub value: i32,
    pub reliability: Reliability,
}

impl PatternDetection {
    fn bullish(kind: PatternKind) -> Self {
        Self {
            kind,
            value: 100,
            reliability: kind.reliability(),
        }
    }

    fn bearish(kind: PatternKind) -> Self {
        Self {
            kind,
            value: -100,
            reliability: kind.reliability(),
        }
    }
}

fn body(bar: &Bar) -> f64 {
    (bar.close - bar.open).abs()
}

fn range(bar: &Bar) -> f64 {
    bar.high - bar.low
}

fn lower_shadow(bar: &Bar) -> f64 {
    bar.open.min(bar.close) - bar.low
}

fn upper_shadow(bar: &Bar) -> f64 {
    bar.high - bar.open.max(bar.close)
}

fn is_bullish_bar(bar: &Bar) -> bool {
    bar.close > bar.open
}

fn detect_doji(bar: &Bar) -> Option<PatternDetection> {
    let r = range(bar);
    if r > 0.0 && body(bar) / r < 0.1 {
        let detection = if lower_shadow(bar) > r * 0.6 {
            PatternDetection::bullish(PatternKind::DragonflyDoji)
        } else if upper_shadow(bar) > r * 0.6 {
            PatternDetection::bearish(PatternKind::GravestoneDoji)
        } else {
            // Pure indecision; sign follows the session drift
            if bar.close >= bar.open {
                PatternDetection::bullish(PatternKind::Doji)
            } else {
                PatternDetection::bearish(PatternKind::Doji)
            }
        };
        return Some(detection);
    }
    None
}

fn detect_hammer_family(bar: &Bar, prior_trend_up: bool) -> Option<PatternDetection> {
    let r = range(bar);
    if r == 0.0 {
        return None;
    }
    let b = body(bar);
    if b / r < 0.3 && lower_shadow(bar) > 2.0 * b && upper_shadow(bar) < b * 0.5 {
        // Same shape reads as hammer after a decline, hanging man after a rise
        return Some(if prior_trend_up {
            PatternDetection::bearish(PatternKind::HangingMan)
        } else {
            PatternDetection::bullish(PatternKind::Hammer)
        });
    }
    if b / r < 0.3 && upper_shadow(bar) > 2.0 * b && lower_shadow(bar) < b * 0.5 {
        return Some(if prior_trend_up {
            PatternDetection::bearish(PatternKind::ShootingStar)
        } else {
            PatternDetection::bullish(PatternKind::InvertedHammer)
        });
    }
    None
}

fn detect_engulfing(prev: &Bar, curr: &Bar) -> Option<PatternDetection> {
    let prev_bullish = is_bullish_bar(prev);
    let curr_bullish = is_bullish_bar(curr);

    if !prev_bullish && curr_bullish && curr.open <= prev.close && curr.close >= prev.open {
        return Some(PatternDetection::bullish(PatternKind::Engulfing));
    }
    if prev_bullish && !curr_bullish && curr.open >= prev.close && curr.close <= prev.open {
        return Some(PatternDetection::bearish(PatternKind::Engulfing));
    }
    None
}

fn detect_harami(prev: &Bar, curr: &Bar) -> Option<PatternDetection> {
    let prev_body = body(prev);
    if prev_body == 0.0 {
        return None;
    }
    let inside = curr.open.max(curr.close) < prev.open.max(prev.close)
        && curr.open.min(curr.close) > prev.open.min(prev.close);
    if !inside {
        return None;
    }
    let kind = if body(curr) / prev_body < 0.1 {
        PatternKind::HaramiCross
    } else {
        PatternKind::Harami
    };
    // Direction opposes the prior candle
    Some(if is_bullish_bar(prev) {
        PatternDetection::bearish(kind)
    } else {
        PatternDetection::bullish(kind)
    })
}

fn detect_piercing_or_dark_cloud(prev: &Bar, curr: &Bar) -> Option<PatternDetection> {
    let prev_mid = (prev.open + prev.close) / 2.0;
    if !is_bullish_bar(prev) && is_bullish_bar(curr) {
        if curr.open < prev.low && curr.close > prev_mid && curr.close < prev.open {
            return Some(PatternDetection::bullish(PatternKind::Piercing));
        }
    }
    if is_bullish_bar(prev) && !is_bullish_bar(curr) {
        if curr.open > prev.high && curr.close < prev_mid && curr.close > prev.open {
            return Some(PatternDetection::bearish(PatternKind::DarkCloudCover));
        }
    }
    None
}

fn detect_stars(first: &Bar, star: &Bar, third: &Bar) -> Option<PatternDetection> {
    let first_body = body(first);
    if range(first) == 0.0 || first_body == 0.0 {
        return None;
    }
    let first_mid = (first.open + first.close) / 2.0;
    let star_small = body(star) < first_body * 0.3;
    let star_is_doji = range(star) > 0.0 && body(star) / range(star) < 0.1;

    if !is_bullish_bar(first) && is_bullish_bar(third) && star_small && third.close > first_mid {
        return Some(PatternDetection::bullish(if star_is_doji {
            PatternKind::MorningDojiStar
        } else {
            PatternKind::MorningStar
        }));
    }
    if is_bullish_bar(first) && !is_bullish_bar(third) && star_small && third.close < first_mid {
        return Some(PatternDetection::bearish(if star_is_doji {
            PatternKind::EveningDojiStar
        } else {
            PatternKind::EveningStar
        }));
    }
    None
}

fn detect_three_soldiers_or_crows(last_3: &[Bar]) -> Option<PatternDetection> {
    if last_3.iter().all(is_bullish_bar)
        && last_3[1].close > last_3[0].close
        && last_3[2].close > last_3[1].close
        && last_3[1].open > last_3[0].open
        && last_3[1].open < last_3[0].close
        && last_3[2].open > last_3[1].open
        && last_3[2].open < last_3[1].close
    {
        return Some(PatternDetection::bullish(PatternKind::ThreeWhiteSoldiers));
    }
    if last_3.iter().all(|b| !is_bullish_bar(b))
        && last_3[1].close < last_3[0].close
        && last_3[2].close < last_3[1].close
        && last_3[1].open < last_3[0].open
        && last_3[1].open > last_3[0].close
        && last_3[2].open < last_3[1].open
        && last_3[2].open > last_3[1].close
    {
        return Some(PatternDetection::bearish(PatternKind::ThreeBlackCrows));
    }
    None
}

fn detect_windows(prev: &Bar, curr: &Bar) -> Option<PatternDetection> {
    if curr.low > prev.high {
        return Some(PatternDetection::bullish(PatternKind::RisingWindow));
    }
    if curr.high < prev.low {
        return Some(PatternDetection::bearish(PatternKind::FallingWindow));
    }
    None
}

/// Evaluate the built-in detectors at the last bar of `bars`.
///
/// Patterns that do not fire are omitted (their value is 0 by convention).
pub fn detect_patterns(bars: &[Bar]) -> Vec<PatternDetection> {
    let mut detections = Vec::new();
    let n = bars.len();
    if n == 0 {
        return detections;
    }

    let last = &bars[n - 1];
    let prior_trend_up = n >= 6 && bars[n - 2].close > bars[n - 6].close;

    if let Some(p) = detect_doji(last) {
        detections.push(p);
    }
    if let Some(p) = detect_hammer_family(last, prior_trend_up) {
        detections.push(p);
    }

    if n >= 2 {
        let prev = &bars[n - 2];
        if let Some(p) = detect_engulfing(prev, last) {
            detections.push(p);
        }
        if let Some(p) = detect_harami(prev, last) {
            detections.push(p);
        }
        if let Some(p) = detect_piercing_or_dark_cloud(prev, last) {
            detections.push(p);
        }
        if let Some(p) = detect_windows(prev, last) {
            detections.push(p);
        }
    }

    if n >= 3 {
        if let Some(p) = detect_stars(&bars[n - 3], &bars[n - 2], last) {
            detections.push(p);
        }
        if let Some(p) = detect_three_soldiers_or_crows(&bars[n - 3..]) {
            detections.push(p);
        }
    }

    detections
}
