//! In-page extraction scripts.
//!
//! All DOM scanning runs as injected IIFE expressions against the live
//! page; results come back as JSON arrays that the extraction engine
//! validates field by field. Site markup conventions (the `원` price
//! suffix, `경유` layover marker, `직항` direct marker, `로고` logo alt
//! suffix) are baked into these scripts and nowhere else.

/// Known domestic carriers, matched by substring against element text.
/// Anything else is bucketed as `기타` (other).
pub const DOMESTIC_AIRLINES: &[&str] = &[
    "대한항공",
    "아시아나",
    "제주항공",
    "진에어",
    "티웨이",
    "에어부산",
    "에어서울",
    "이스타항공",
    "하이에어",
    "에어프레미아",
    "플라이강원",
];

// Shared pattern fragments (JS regex literals).
const TIME_RANGE_RE: &str = r"/(\d{2}:\d{2})\s*-\s*(\d{2}:\d{2})/";
const PRICE_RE: &str = r"/(\d{1,3},\d{3},?\d{0,3})\s*원/";
const STOPS_RE: &str = r"/(\d)회\s*경유/";

fn js_string_array(items: &[&str]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Group a KRW amount with thousands separators, as rendered on-site.
pub(crate) fn format_krw(amount: u64) -> String {
    let digits = amount.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

/// Domestic list scan: every button whose text carries a time range and a
/// plausible price, excluding promotional tiles. Used by the scrolling
/// collector during the two-step round-trip flow.
pub fn domestic_list() -> String {
    r#"
    (() => {
        const results = [];
        const airlines = __AIRLINES__;
        const buttons = document.querySelectorAll('button');
        for (const btn of buttons) {
            try {
                const text = btn.textContent || '';
                const timeMatch = text.match(__TIME_RE__);
                if (!timeMatch) continue;
                const priceMatch = text.match(__PRICE_RE__);
                if (!priceMatch) continue;

                const price = parseInt(priceMatch[1].replace(/[^\d]/g, ''));
                if (price < 1000 || price > 10000000) continue;
                if (text.includes('이벤트') || text.includes('프로모션')) continue;

                let airline = '기타';
                for (const a of airlines) {
                    if (text.includes(a)) { airline = a; break; }
                }

                let stops = 0;
                if (text.includes('경유')) stops = 1;

                results.push({
                    airline: airline,
                    price: price,
                    depTime: timeMatch[1],
                    arrTime: timeMatch[2],
                    stops: stops
                });
            } catch (e) { }
        }
        return results;
    })()
    "#
    .replace("__AIRLINES__", &js_string_array(DOMESTIC_AIRLINES))
    .replace("__TIME_RE__", TIME_RANGE_RE)
    .replace("__PRICE_RE__", PRICE_RE)
}

/// Domestic one-way scan with explicit layover-count parsing.
pub fn domestic_prices() -> String {
    r#"
    (() => {
        const results = [];
        const airlines = __AIRLINES__;
        const allButtons = document.querySelectorAll('button');
        for (const btn of allButtons) {
            try {
                const text = btn.textContent || '';
                const timeMatch = text.match(__TIME_RE__);
                if (!timeMatch) continue;
                const priceMatch = text.match(__PRICE_RE__);
                if (!priceMatch) continue;

                let airline = '기타';
                for (const a of airlines) {
                    if (text.includes(a)) { airline = a; break; }
                }

                let stops = 0;
                if (text.includes('경유')) {
                    const stopMatch = text.match(__STOPS_RE__);
                    stops = stopMatch ? parseInt(stopMatch[1]) : 1;
                }

                const price = parseInt(priceMatch[1].replace(/,/g, ''));
                results.push({
                    airline: airline,
                    price: price,
                    depTime: timeMatch[1],
                    arrTime: timeMatch[2],
                    stops: stops
                });
            } catch (e) { }
        }
        return results;
    })()
    "#
    .replace("__AIRLINES__", &js_string_array(DOMESTIC_AIRLINES))
    .replace("__TIME_RE__", TIME_RANGE_RE)
    .replace("__PRICE_RE__", PRICE_RE)
    .replace("__STOPS_RE__", STOPS_RE)
}

/// International card scan over `li[data-index]` items. Four or more time
/// spans on one card means the card shows both legs of a round trip.
pub fn international_prices() -> String {
    r#"
    (() => {
        const results = [];
        const cards = document.querySelectorAll('li[data-index]');
        for (const card of cards) {
            try {
                const allSpans = Array.from(card.querySelectorAll('span'));
                const priceEl = allSpans.find(el => /^[0-9,]+\s*원$/.test(el.textContent.trim()));
                if (!priceEl) continue;
                const price = parseInt(priceEl.textContent.replace(/[^0-9]/g, ''));

                const timeSpans = allSpans.filter(el => /^\d{2}:\d{2}$/.test(el.textContent.trim()));
                const times = timeSpans.map(el => el.textContent.trim());
                if (times.length < 2) continue;

                const logoImgs = card.querySelectorAll('img[alt$="로고"]');
                let airline = '기타';
                if (logoImgs.length > 0) {
                    airline = logoImgs[0].alt.replace(' 로고', '');
                }

                const cardText = card.textContent;
                let stops = 0;
                let retStops = 0;
                const stopMatches = cardText.match(/(\d)회\s*경유/g);
                if (stopMatches) {
                    stops = parseInt(stopMatches[0].replace(/[^0-9]/g, ''));
                    retStops = (stopMatches.length > 1) ? parseInt(stopMatches[1].replace(/[^0-9]/g, '')) : stops;
                } else if (cardText.includes('직항')) {
                    stops = 0; retStops = 0;
                } else {
                    stops = 1; retStops = 1;
                }

                const isRoundTrip = times.length >= 4;
                results.push({
                    airline: airline,
                    price: price,
                    depTime: times[0],
                    arrTime: times[1],
                    stops: stops,
                    retDepTime: isRoundTrip ? times[2] : '',
                    retArrTime: isRoundTrip ? times[3] : '',
                    retStops: isRoundTrip ? retStops : 0,
                    isRoundTrip: isRoundTrip
                });
            } catch (e) { }
        }
        return results;
    })()
    "#
    .to_string()
}

/// Looser sweep for when the primary card selector finds nothing
/// (markup drift). Bounded to 300 candidates.
pub fn international_prices_fallback() -> String {
    r#"
    (() => {
        const results = [];
        const candidates = document.querySelectorAll(
            'li[data-index], div[data-index], li[class*="result"], div[class*="result"], li[class*="ticket"], div[class*="ticket"]'
        );
        for (const card of candidates) {
            try {
                const text = card.textContent || '';
                const priceMatch = text.match(__PRICE_RE__);
                if (!priceMatch) continue;
                const price = parseInt(priceMatch[1].replace(/[^0-9]/g, ''));

                const timeMatches = text.match(/(\d{2}:\d{2})\s*-\s*(\d{2}:\d{2})/g) || [];
                const times = [];
                for (const t of timeMatches) {
                    const parts = t.match(__TIME_RE__);
                    if (parts && parts.length >= 3) {
                        times.push(parts[1], parts[2]);
                    }
                }
                if (times.length < 2) continue;

                let airline = '기타';
                const logoImgs = card.querySelectorAll('img[alt]');
                if (logoImgs.length > 0) {
                    airline = logoImgs[0].alt.replace(' 로고', '').trim();
                }

                let stops = 0;
                let retStops = 0;
                const stopMatches = text.match(/(\d)회\s*경유/g);
                if (stopMatches) {
                    stops = parseInt(stopMatches[0].replace(/[^0-9]/g, ''));
                    retStops = (stopMatches.length > 1)
                        ? parseInt(stopMatches[1].replace(/[^0-9]/g, ''))
                        : stops;
                } else if (text.includes('직항')) {
                    stops = 0;
                    retStops = 0;
                } else {
                    stops = 1;
                    retStops = 1;
                }

                const isRoundTrip = times.length >= 4;
                results.push({
                    airline: airline,
                    price: price,
                    depTime: times[0],
                    arrTime: times[1],
                    stops: stops,
                    retDepTime: isRoundTrip ? times[2] : '',
                    retArrTime: isRoundTrip ? times[3] : '',
                    retStops: retStops,
                    isRoundTrip: isRoundTrip
                });
                if (results.length >= 300) break;
            } catch (e) { }
        }
        return results;
    })()
    "#
    .replace("__TIME_RE__", TIME_RANGE_RE)
    .replace("__PRICE_RE__", PRICE_RE)
}

/// Click the button matching a specific (airline, times, price-text)
/// combination. Returns whether anything was clicked.
pub fn click_flight_by_details(
    airline: &str,
    dep_time: &str,
    arr_time: &str,
    price_text: &str,
) -> String {
    r#"
    (() => {
        const airline = __AIRLINE__;
        const dep = __DEP__;
        const arr = __ARR__;
        const priceText = __PRICE__;
        const buttons = document.querySelectorAll('button');
        for (const btn of buttons) {
            const text = btn.textContent || '';
            if (airline && !text.includes(airline)) continue;
            if (dep && !text.includes(dep)) continue;
            if (arr && !text.includes(arr)) continue;
            if (priceText && !text.includes(priceText)) continue;
            btn.click();
            return true;
        }
        return false;
    })()
    "#
    .replace("__AIRLINE__", &js_string(airline))
    .replace("__DEP__", &js_string(dep_time))
    .replace("__ARR__", &js_string(arr_time))
    .replace("__PRICE__", &js_string(price_text))
}

/// Looser click fallback: any button carrying a known airline plus a
/// time range and a price.
pub fn click_any_known_flight() -> String {
    r#"
    (() => {
        const airlines = __AIRLINES__;
        const buttons = document.querySelectorAll('button');
        for (const btn of buttons) {
            const text = btn.textContent || '';
            if (__TIME_RE__.test(text) &&
                /[0-9,]+\s*원/.test(text) &&
                airlines.some(a => text.includes(a))) {
                btn.click();
                return true;
            }
        }
        return false;
    })()
    "#
    .replace("__AIRLINES__", &js_string_array(DOMESTIC_AIRLINES))
    .replace("__TIME_RE__", TIME_RANGE_RE)
}

/// Advance the scroll position (window first, then known scroll
/// containers) and report `{canScroll, reachedBottom}`.
pub fn scroll_check() -> String {
    r#"
    (() => {
        const beforeScroll = window.scrollY;
        const beforeHeight = document.body.scrollHeight;

        const totalHeight = document.body.scrollHeight;
        const currentScroll = window.scrollY + window.innerHeight;
        const isAtBottom = (totalHeight - currentScroll) <= 5;

        if (!isAtBottom) {
            window.scrollBy(0, 500);
        } else {
            const containers = [
                document.querySelector('div[scrollable="true"]'),
                document.querySelector('[class*="flightList"]'),
                document.querySelector('[class*="resultList"]'),
                document.querySelector('div[style*="overflow"]'),
            ];
            for (const container of containers) {
                if (container && container.scrollHeight > container.clientHeight) {
                    const containerAtBottom = (container.scrollHeight - container.scrollTop - container.clientHeight) <= 5;
                    if (!containerAtBottom) {
                        container.scrollTop += 500;
                        break;
                    }
                }
            }
        }

        const afterScroll = window.scrollY;
        const afterHeight = document.body.scrollHeight;
        const canScroll = (afterScroll !== beforeScroll) || (afterHeight !== beforeHeight);

        const finalTotalHeight = document.body.scrollHeight;
        const finalCurrentScroll = window.scrollY + window.innerHeight;
        const reachedBottom = (finalTotalHeight - finalCurrentScroll) <= 5;

        return {
            canScroll: canScroll,
            reachedBottom: reachedBottom && !canScroll
        };
    })()
    "#
    .to_string()
}

pub fn scroll_to_bottom() -> &'static str {
    "window.scrollTo(0, document.body.scrollHeight)"
}

pub fn body_scroll_height() -> &'static str {
    "document.body.scrollHeight"
}

/// Results-indicator detectors polled during the wait-for-data phase.
/// Domestic results render as price-bearing buttons, international ones
/// as indexed card list items; both fall back to a bare price-pattern
/// scan of the body text.
pub fn results_ready_detectors(domestic: bool) -> Vec<String> {
    let price_text_scan = r#"
    (() => {
        const text = document.body ? document.body.innerText : '';
        return /\d{1,3}(,\d{3})+\s*원/.test(text);
    })()
    "#
    .to_string();

    if domestic {
        let buttons = r#"
        (() => {
            const buttons = document.querySelectorAll('button');
            for (const btn of buttons) {
                if (/\d{1,3}(,\d{3})+\s*원/.test(btn.textContent || '')) return true;
            }
            return false;
        })()
        "#
        .to_string();
        vec![buttons, price_text_scan]
    } else {
        let cards = "document.querySelector('li[data-index]') !== null".to_string();
        vec![cards, price_text_scan]
    }
}

/// The inbound panel is considered ready once the page mentions the
/// inbound-leg header and at least five priced nodes are rendered.
pub fn domestic_return_view_ready() -> String {
    r#"
    (() => {
        const bodyText = document.body ? document.body.innerText : '';
        const priceNodes = document.querySelectorAll('button, li, span');
        let priceCount = 0;
        for (const node of priceNodes) {
            const text = node.textContent || '';
            if (/\d{1,3}(,\d{3})+\s*원/.test(text)) {
                priceCount += 1;
                if (priceCount >= 5) break;
            }
        }
        return bodyText.includes('오는편') && priceCount >= 5;
    })()
    "#
    .to_string()
}
