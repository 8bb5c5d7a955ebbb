//! Keyword metadata for resolved reports.
//!
//! Keywords come from the report title and, when the detail page was
//! fetched, from its headings, title-like labels, breadcrumbs and tags.
//! Cache hits carry no detail HTML and are described from the title alone.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

const INDUSTRY_TERMS: &[&str] = &[
    "银行", "证券", "保险", "金融", "地产", "房地产", "建筑", "建材", "钢铁", "有色", "煤炭",
    "石油", "化工", "电力", "新能源", "光伏", "风电", "核电", "汽车", "新能源车", "电动车",
    "医药", "生物", "医疗", "消费", "食品", "饮料", "白酒", "零售", "电商", "互联网", "科技",
    "电子", "半导体", "芯片", "通信", "5G", "人工智能", "AI", "大数据", "云计算", "软件", "游戏",
    "传媒", "教育", "旅游", "航空", "物流", "农业", "养殖", "环保", "公用事业", "交通运输",
    "机械", "军工",
];

const STRATEGY_TERMS: &[&str] = &[
    "配置", "估值", "投资", "策略", "配置建议", "投资策略", "市场", "行情", "趋势", "展望",
    "预测", "分析", "研究", "报告", "观点", "机会", "风险", "建议", "推荐", "评级", "目标价",
    "买入", "卖出", "持有", "增持", "减持", "中性", "看好", "看空",
];

const MACRO_TERMS: &[&str] = &[
    "GDP", "CPI", "PPI", "通胀", "通缩", "利率", "汇率", "货币政策", "财政政策", "经济", "宏观",
    "宏观研究", "宏观经济", "经济数据", "PMI", "就业", "失业", "消费", "投资", "出口", "进口",
    "贸易", "财政", "债务", "赤字", "流动性", "信贷", "M2", "社融",
];

/// Suffixes that mark a company name (`某某股份`, `某某集团`).
const COMPANY_MARKERS: &[&str] = &[
    "股份", "集团", "公司", "有限", "科技", "发展", "实业", "投资", "控股", "股份公司", "A股", "H股",
];

/// Summaries longer than this many chars are cut and marked with `...`.
const SUMMARY_CHARS: usize = 100;

/// Page text longer than this is body copy, not a label.
const MAX_LABEL_CHARS: usize = 100;

#[allow(clippy::expect_used)]
static STOCK_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{6})\b").expect("static regex is valid"));

#[allow(clippy::expect_used)]
static HEADINGS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").expect("static selector is valid"));

#[allow(clippy::expect_used)]
static CLASSED: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[class]").expect("static selector is valid"));

#[allow(clippy::expect_used)]
static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("static selector is valid"));

#[allow(clippy::expect_used)]
static TITLE_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)title|category|tag|label|name").expect("static regex is valid")
});

#[allow(clippy::expect_used)]
static NAV_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)breadcrumb|nav|path").expect("static regex is valid"));

#[allow(clippy::expect_used)]
static TAG_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)tag|label|badge").expect("static regex is valid"));

/// Keywords grouped by report family, each list in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keywords {
    /// Six-digit codes and company-like names.
    pub stocks: Vec<String>,
    pub industries: Vec<String>,
    pub strategies: Vec<String>,
    #[serde(rename = "macro")]
    pub macro_terms: Vec<String>,
}

impl Keywords {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stocks.is_empty()
            && self.industries.is_empty()
            && self.strategies.is_empty()
            && self.macro_terms.is_empty()
    }

    fn push_unique(list: &mut Vec<String>, value: &str) {
        if !list.iter().any(|v| v == value) {
            list.push(value.to_string());
        }
    }

    fn add_terms(&mut self, text: &str) {
        for code in STOCK_CODE.captures_iter(text) {
            Self::push_unique(&mut self.stocks, &code[1]);
        }
        for term in INDUSTRY_TERMS.iter().filter(|t| text.contains(*t)) {
            Self::push_unique(&mut self.industries, term);
        }
        for term in STRATEGY_TERMS.iter().filter(|t| text.contains(*t)) {
            Self::push_unique(&mut self.strategies, term);
        }
        let lower = text.to_lowercase();
        for term in MACRO_TERMS
            .iter()
            .filter(|t| text.contains(*t) || lower.contains(&t.to_lowercase()))
        {
            Self::push_unique(&mut self.macro_terms, term);
        }
    }

    /// Classifies a short piece of page text.
    fn add_label(&mut self, text: &str) {
        let chars = text.chars().count();
        if chars == 0 || chars > MAX_LABEL_CHARS {
            return;
        }
        self.add_terms(text);
        if (2..=20).contains(&chars) && is_company_like(text) {
            Self::push_unique(&mut self.stocks, text);
        }
    }
}

/// Per-report descriptive metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub keywords: Keywords,
    pub summary: String,
    /// Name of the handler that listed the report.
    pub source: String,
    pub extracted_at: Option<DateTime<Utc>>,
}

impl ReportMetadata {
    #[must_use]
    pub fn stamped(mut self, at: DateTime<Utc>) -> Self {
        self.extracted_at = Some(at);
        self
    }
}

/// Builds metadata from a title and, if present, the detail page HTML.
#[must_use]
pub fn extract_metadata(title: &str, detail_html: Option<&str>, source: &str) -> ReportMetadata {
    let mut keywords = title_keywords(title);
    if let Some(html) = detail_html {
        let page = page_keywords(html);
        for (ours, theirs) in [
            (&mut keywords.stocks, page.stocks),
            (&mut keywords.industries, page.industries),
            (&mut keywords.strategies, page.strategies),
            (&mut keywords.macro_terms, page.macro_terms),
        ] {
            for value in theirs {
                Keywords::push_unique(ours, &value);
            }
        }
    }
    ReportMetadata {
        keywords,
        summary: summarize(title),
        source: source.to_string(),
        extracted_at: None,
    }
}

fn title_keywords(title: &str) -> Keywords {
    let mut keywords = Keywords::default();
    keywords.add_terms(title);
    if let Some((head, _)) = title.split_once(['：', ':']) {
        let head = head.trim();
        if is_company_like(head) {
            Keywords::push_unique(&mut keywords.stocks, head);
        }
    }
    keywords
}

fn page_keywords(html: &str) -> Keywords {
    let doc = Html::parse_document(html);
    let mut keywords = Keywords::default();

    for heading in doc.select(&HEADINGS) {
        keywords.add_label(&element_text(heading));
    }
    for element in doc.select(&CLASSED) {
        let class = element.value().attr("class").unwrap_or_default();
        if TITLE_CLASS.is_match(class) {
            let text = element_text(element);
            if text.chars().count() < 50 {
                keywords.add_label(&text);
            }
        }
        if NAV_CLASS.is_match(class) {
            for link in element.select(&ANCHORS) {
                keywords.add_label(&element_text(link));
            }
        }
        if TAG_CLASS.is_match(class) {
            let text = element_text(element);
            if text.chars().count() < 30 {
                keywords.add_label(&text);
            }
        }
    }
    keywords
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().map(str::trim).collect::<String>()
}

fn is_company_like(text: &str) -> bool {
    COMPANY_MARKERS.iter().any(|m| text.contains(m))
}

fn summarize(title: &str) -> String {
    if title.chars().count() > SUMMARY_CHARS {
        let cut: String = title.chars().take(SUMMARY_CHARS).collect();
        format!("{cut}...")
    } else {
        title.to_string()
    }
}
