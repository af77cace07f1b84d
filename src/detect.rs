//! Detection of embedded presentations in a host page.

use scraper::{Html, Selector};
use serde::Serialize;
use url::Url;

/// A presentation embedded in the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Embed {
    pub id: String,
    pub url: String,
}

/// Known presentation hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    GoogleSlides,
    PowerPointOnline,
    OneDrive,
    Prezi,
    SlideShare,
    Canva,
}

fn host_is(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .map_or(false, |prefix| prefix.ends_with('.'))
}

impl Provider {
    /// Classify an embed URL, or `None` if it is not a known presentation.
    pub fn classify(url: &Url) -> Option<Provider> {
        let host = url.host_str()?.to_ascii_lowercase();
        let path = url.path().to_ascii_lowercase();
        let under = |prefix: &str| path.starts_with(prefix);

        if host_is(&host, "docs.google.com") && (under("/presentation") || under("/embed")) {
            Some(Provider::GoogleSlides)
        } else if host_is(&host, "office.com") && under("/embed/powerpoint") {
            Some(Provider::PowerPointOnline)
        } else if (host_is(&host, "onedrive.live.com") && under("/embed"))
            || (host_is(&host, "1drv.ms") && under("/p/c/"))
        {
            Some(Provider::OneDrive)
        } else if host_is(&host, "prezi.com") && (under("/p/embed/") || under("/view/")) {
            Some(Provider::Prezi)
        } else if host_is(&host, "slideshare.net") && under("/slideshow/embed_code") {
            Some(Provider::SlideShare)
        } else if host_is(&host, "canva.com") && under("/design/") {
            Some(Provider::Canva)
        } else {
            None
        }
    }
}

/// Finds presentation embeds in a page.
pub trait Detector {
    /// Embeds in document order.
    fn detect(&self, html: &str) -> Vec<Embed>;
}

/// Matches `<iframe src>` against the [`Provider`] list.
#[derive(Debug, Default, Clone)]
pub struct PatternDetector {
    base: Option<Url>,
}

impl PatternDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative `src` attributes against `base`.
    pub fn with_base(base: Url) -> Self {
        Self { base: Some(base) }
    }

    fn resolve(&self, src: &str) -> Option<Url> {
        let src = src.trim();
        match &self.base {
            Some(base) => base.join(src).ok(),
            None if src.starts_with("//") => Url::parse(&format!("https:{}", src)).ok(),
            None => Url::parse(src).ok(),
        }
    }
}

impl Detector for PatternDetector {
    fn detect(&self, html: &str) -> Vec<Embed> {
        let document = Html::parse_document(html);
        let iframes = Selector::parse("iframe[src]").expect("static selector");
        document
            .select(&iframes)
            .filter_map(|el| {
                let src = el.value().attr("src")?;
                let url = self.resolve(src)?;
                Provider::classify(&url)?;
                let id = el.value().attr("id").map(str::to_string);
                Some((id, url))
            })
            .enumerate()
            .map(|(n, (id, url))| Embed {
                id: id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("presentation-{}", n)),
                url: url.into(),
            })
            .collect()
    }
}
