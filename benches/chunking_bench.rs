use criterion::{black_box, criterion_group, criterion_main, Criterion};
use video_summary_rust::transcript::{dedupe_rolling_captions, ChunkProfile};
use video_summary_rust::{parse_subtitles, Chunker, LanguageClassifier, TimeRangeMapper};

/// One hour of two-second cues
fn lecture_srt(cjk: bool) -> String {
    let mut srt = String::new();
    for i in 0..1800u64 {
        let start = i * 2;
        let end = start + 2;
        let text = if cjk {
            format!("第{}句：光栅化把三角形转换为屏幕上的像素片段。", i)
        } else {
            format!("sentence {} rasterization turns triangles into fragments on screen", i)
        };
        srt.push_str(&format!(
            "{}\n{:02}:{:02}:{:02},000 --> {:02}:{:02}:{:02},000\n{}\n\n",
            i + 1,
            start / 3600,
            start / 60 % 60,
            start % 60,
            end / 3600,
            end / 60 % 60,
            end % 60,
            text
        ));
    }
    srt
}

fn bench_parsing(c: &mut Criterion) {
    let srt = lecture_srt(false);
    c.bench_function("parse_one_hour_srt", |b| {
        b.iter(|| black_box(parse_subtitles(black_box(&srt))))
    });

    let cues = parse_subtitles(&srt).map(|t| t.cues().to_vec()).unwrap_or_default();
    c.bench_function("dedupe_rolling_captions", |b| {
        b.iter(|| black_box(dedupe_rolling_captions(cues.clone())))
    });
}

fn bench_chunking(c: &mut Criterion) {
    let classifier = LanguageClassifier::default();

    for (name, cjk) in [("chunk_non_cjk_hour", false), ("chunk_cjk_hour", true)] {
        let transcript = match parse_subtitles(&lecture_srt(cjk)) {
            Ok(transcript) => transcript,
            Err(_) => return,
        };
        let (_, profile) = classifier.classify(transcript.text());
        let chunker = match Chunker::new(profile) {
            Ok(chunker) => chunker,
            Err(_) => return,
        };

        c.bench_function(name, |b| {
            b.iter(|| {
                let chunks = chunker.chunk(black_box(&transcript));
                black_box(TimeRangeMapper::map_all(&chunks, transcript.cues()))
            })
        });
    }

    let small = ChunkProfile {
        chunk_size: 200,
        ..ChunkProfile::non_cjk_default()
    };
    if let (Ok(transcript), Ok(chunker)) = (parse_subtitles(&lecture_srt(false)), Chunker::new(small)) {
        c.bench_function("chunk_many_small", |b| {
            b.iter(|| black_box(chunker.chunk(black_box(&transcript))))
        });
    }

    c.bench_function("classify_language", |b| {
        let text = lecture_srt(true);
        b.iter(|| black_box(classifier.classify(black_box(&text))))
    });
}

criterion_group!(benches, bench_parsing, bench_chunking);
criterion_main!(benches);
